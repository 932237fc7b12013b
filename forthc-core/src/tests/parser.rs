#[cfg(test)]
mod tests {
    use crate::parser::*;
    use crate::tokens::*;
    use pretty_assertions::assert_eq;

    fn parse_source(input: &str) -> Program {
        let tokens = tokenize(input.as_bytes()).unwrap();
        let program = parse(tokens);
        if program.is_err() {
            println!("{:?} for input {}", program, input);
        }
        program.unwrap()
    }

    fn body(input: &str) -> Vec<AstNodeSpan> {
        parse_source(input).words.remove(0).body
    }

    #[test]
    fn basic_test() {
        assert_eq!(parse_source(""), Program::default());

        let program = parse_source(": main 1 2 + . ;");
        assert_eq!(
            program,
            Program {
                words: vec![WordDefinition {
                    name: "main".to_string(),
                    line: 1,
                    col: 3,
                    locals: vec![],
                    body: vec![
                        node_span_with(AstNode::NodeIntLiteral(1), 1, 8),
                        node_span_with(AstNode::NodeIntLiteral(2), 1, 10),
                        node_span_with(AstNode::NodeOperator(Operator::Add), 1, 12),
                        node_span_with(AstNode::NodeOperator(Operator::Print), 1, 14),
                    ]
                }]
            }
        );
        assert!(program.words[0].is_main());
    }

    #[test]
    fn test_words_and_calls() {
        let program = parse_source(": sq DUP * ;\n: main 3 sq . 0 ;");
        assert_eq!(program.words.len(), 2);
        assert_eq!(
            program.words[0].body,
            vec![
                node_span_with(AstNode::NodeBuiltin(Builtin::Dup), 1, 6),
                node_span_with(AstNode::NodeOperator(Operator::Mul), 1, 10),
            ]
        );
        assert_eq!(
            program.words[1].body[1],
            node_span_with(AstNode::NodeCall("sq".to_string()), 2, 10)
        );
        // calls are resolved later, forward references are fine here
        assert_eq!(
            body(": main later ;"),
            vec![node_span_with(AstNode::NodeCall("later".to_string()), 1, 8)]
        );
    }

    #[test]
    fn test_builtins() {
        assert_eq!(
            body(": main DUP drop Swap OVER ;")
                .into_iter()
                .map(|n| n.node)
                .collect::<Vec<_>>(),
            vec![
                AstNode::NodeBuiltin(Builtin::Dup),
                AstNode::NodeBuiltin(Builtin::Drop),
                AstNode::NodeCall("Swap".to_string()),
                AstNode::NodeBuiltin(Builtin::Over),
            ]
        );
    }

    #[test]
    fn test_locals() {
        let program = parse_source(": main [ a b ] 5 a ! a @ b ;");
        let word = &program.words[0];
        assert_eq!(word.locals, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            word.body
                .iter()
                .map(|n| n.node.clone())
                .collect::<Vec<_>>(),
            vec![
                AstNode::NodeIntLiteral(5),
                AstNode::NodeLocal(0),
                AstNode::NodeOperator(Operator::Store),
                AstNode::NodeLocal(0),
                AstNode::NodeOperator(Operator::Fetch),
                AstNode::NodeLocal(1),
            ]
        );

        // locals are scoped to their word
        let program = parse_source(": f [ x ] x ; : main x ;");
        assert_eq!(program.words[0].body[0].node, AstNode::NodeLocal(0));
        assert_eq!(
            program.words[1].body[0].node,
            AstNode::NodeCall("x".to_string())
        );
        assert_eq!(parse_source(": main [ ] 1 ;").words[0].locals.len(), 0);
    }

    #[test]
    fn test_if() {
        assert_eq!(
            body(": main 1 IF 2 THEN ;"),
            vec![
                node_span_with(AstNode::NodeIntLiteral(1), 1, 8),
                node_span_with(
                    AstNode::NodeIf(Box::new(NodeIf {
                        then_block: vec![node_span_with(AstNode::NodeIntLiteral(2), 1, 13)],
                        else_block: None,
                        else_at: None,
                        then_at: (1, 15),
                    })),
                    1,
                    10
                ),
            ]
        );

        assert_eq!(
            body(": main 0 IF 1 ELSE 2 THEN ;")[1],
            node_span_with(
                AstNode::NodeIf(Box::new(NodeIf {
                    then_block: vec![node_span_with(AstNode::NodeIntLiteral(1), 1, 13)],
                    else_block: Some(vec![node_span_with(AstNode::NodeIntLiteral(2), 1, 20)]),
                    else_at: Some((1, 15)),
                    then_at: (1, 22),
                })),
                1,
                10
            )
        );

        // empty branches
        let nodes = body(": main 0 IF ELSE THEN ;");
        let AstNode::NodeIf(node_if) = &nodes[1].node else {
            panic!("expected IF, got {:?}", nodes[1]);
        };
        assert!(node_if.then_block.is_empty());
        assert_eq!(node_if.else_block, Some(vec![]));
    }

    #[test]
    fn test_nested_control_flow() {
        let nodes = body(": main 10 0 DO 1 IF 3 0 DO LEAVE LOOP THEN LOOP ;");
        let AstNode::NodeDoLoop(outer) = &nodes[2].node else {
            panic!("expected DO, got {:?}", nodes[2]);
        };
        assert_eq!(outer.loop_at, (1, 44));
        let AstNode::NodeIf(node_if) = &outer.body[1].node else {
            panic!("expected IF, got {:?}", outer.body[1]);
        };
        let AstNode::NodeDoLoop(inner) = &node_if.then_block[2].node else {
            panic!("expected DO, got {:?}", node_if.then_block[2]);
        };
        assert_eq!(
            inner.body,
            vec![node_span_with(AstNode::NodeBuiltin(Builtin::Leave), 1, 28)]
        );
    }
}
