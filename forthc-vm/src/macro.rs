macro_rules! arg {
    ($args: expr, $i: expr) => {{
        let Some(arg) = $args.get($i) else {
            bail!("Missing operand {}", $i);
        };
        arg
    }};
}

macro_rules! binary {
    ($machine: expr, $args: expr, |$a: ident, $b: ident| $body: expr) => {{
        let dst = arg!($args, 0);
        let $a = $machine.read(dst)?;
        let $b = $machine.read(arg!($args, 1))?;
        $machine.write(dst, $body)?;
        Ok(OpcodeResult::Continue)
    }};
}
