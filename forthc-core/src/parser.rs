use std::fmt::{Display, Formatter};

use crate::error::CompileError;
use crate::tokens::{Keyword, Token, TokenSpan};
use anyhow::{anyhow, bail, Result};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Print,
    Fetch,
    Store,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Builtin {
    Dup,
    Drop,
    Swap,
    Over,
    Leave,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Builtin> {
        match name {
            "DUP" | "dup" => Some(Builtin::Dup),
            "DROP" | "drop" => Some(Builtin::Drop),
            "SWAP" | "swap" => Some(Builtin::Swap),
            "OVER" | "over" => Some(Builtin::Over),
            "LEAVE" | "leave" => Some(Builtin::Leave),
            _ => None,
        }
    }
}

impl Display for Builtin {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Builtin::Dup => write!(f, "DUP"),
            Builtin::Drop => write!(f, "DROP"),
            Builtin::Swap => write!(f, "SWAP"),
            Builtin::Over => write!(f, "OVER"),
            Builtin::Leave => write!(f, "LEAVE"),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum AstNode {
    NodeIntLiteral(i64),
    NodeOperator(Operator),
    NodeBuiltin(Builtin),
    /// slot index into the enclosing word's locals
    NodeLocal(usize),
    NodeCall(String),
    NodeIf(Box<NodeIf>),
    NodeDoLoop(Box<NodeDoLoop>),
}

#[derive(Debug, PartialEq, Clone)]
pub struct AstNodeSpan {
    pub node: AstNode,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, PartialEq, Clone)]
pub struct NodeIf {
    pub then_block: Vec<AstNodeSpan>,
    pub else_block: Option<Vec<AstNodeSpan>>,
    pub else_at: Option<(usize, usize)>,
    pub then_at: (usize, usize),
}

#[derive(Debug, PartialEq, Clone)]
pub struct NodeDoLoop {
    pub body: Vec<AstNodeSpan>,
    pub loop_at: (usize, usize),
}

#[derive(Debug, PartialEq, Clone)]
pub struct WordDefinition {
    pub name: String,
    pub line: usize,
    pub col: usize,
    pub locals: Vec<String>,
    pub body: Vec<AstNodeSpan>,
}

impl WordDefinition {
    pub fn is_main(&self) -> bool {
        self.name == "main"
    }
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Program {
    pub words: Vec<WordDefinition>,
}

pub fn node_span_with(node: AstNode, line: usize, col: usize) -> AstNodeSpan {
    AstNodeSpan { node, line, col }
}

pub fn parse(tokens: Vec<TokenSpan>) -> Result<Program> {
    let mut index = 0;
    parse_program(&tokens, &mut index).map_err(|e| {
        let (line, col) = position(&tokens, index);
        anyhow!(CompileError::Parse {
            message: e.to_string(),
            line,
            col,
        })
    })
}

fn parse_program(tokens: &[TokenSpan], index: &mut usize) -> Result<Program> {
    let mut words = vec![];
    loop {
        match peek(tokens, *index) {
            Token::Eof => break,
            Token::Colon => {
                *index += 1;
                words.push(parse_word(tokens, index)?);
            }
            other => bail!("Expected {}, got {}", Token::Colon, other),
        }
    }
    Ok(Program { words })
}

fn parse_word(tokens: &[TokenSpan], index: &mut usize) -> Result<WordDefinition> {
    let (line, col) = position(tokens, *index);
    let name = expect_ident(tokens, index)?.to_string();

    let locals = match peek(tokens, *index) {
        Token::OpenBracket => {
            *index += 1;
            parse_locals(tokens, index)?
        }
        _ => vec![],
    };

    let body = parse_block(tokens, index, &locals, 0)?;

    match peek(tokens, *index) {
        Token::SemiColon => *index += 1,
        Token::Kwd(kwd @ (Keyword::Else | Keyword::Then)) => {
            bail!("{kwd} without matching {}", Keyword::If)
        }
        Token::Kwd(Keyword::Loop) => {
            bail!("{} without matching {}", Keyword::Loop, Keyword::Do)
        }
        Token::Eof => bail!("Unterminated definition of '{name}'"),
        other => bail!("Expected {}, got {}", Token::SemiColon, other),
    }

    Ok(WordDefinition {
        name,
        line,
        col,
        locals,
        body,
    })
}

/// Parse `[ a b c ]` after the opening bracket.
fn parse_locals(tokens: &[TokenSpan], index: &mut usize) -> Result<Vec<String>> {
    let mut locals: Vec<String> = vec![];
    loop {
        match peek(tokens, *index) {
            Token::CloseBracket => {
                *index += 1;
                break;
            }
            Token::Ident(name) => {
                if Builtin::lookup(name).is_some() {
                    bail!("Can't declare '{name}'. A built-in word with the same name already exists")
                }
                if locals.contains(name) {
                    bail!("Can't declare '{name}'. A local with the same name already exists")
                }
                locals.push(name.clone());
                *index += 1;
            }
            other => bail!("Expected identifier, got {other}"),
        }
    }
    Ok(locals)
}

/// Parse nodes until a block terminator (`;`, `ELSE`, `THEN`, `LOOP` or end
/// of file). The terminator is left for the caller to check.
fn parse_block(
    tokens: &[TokenSpan],
    index: &mut usize,
    locals: &[String],
    loop_depth: usize,
) -> Result<Vec<AstNodeSpan>> {
    let mut nodes = vec![];

    loop {
        let (line, col) = position(tokens, *index);
        let node = match peek(tokens, *index) {
            Token::SemiColon
            | Token::Eof
            | Token::Kwd(Keyword::Else | Keyword::Then | Keyword::Loop) => break,
            Token::Colon => bail!("Unexpected {} inside a word definition", Token::Colon),
            Token::OpenBracket | Token::CloseBracket => {
                bail!("Unexpected {}", peek(tokens, *index))
            }
            Token::Int(v) => AstNode::NodeIntLiteral(*v),
            Token::Add => AstNode::NodeOperator(Operator::Add),
            Token::Sub => AstNode::NodeOperator(Operator::Sub),
            Token::Mul => AstNode::NodeOperator(Operator::Mul),
            Token::Div => AstNode::NodeOperator(Operator::Div),
            Token::Mod => AstNode::NodeOperator(Operator::Mod),
            Token::Dot => AstNode::NodeOperator(Operator::Print),
            Token::Fetch => AstNode::NodeOperator(Operator::Fetch),
            Token::Store => AstNode::NodeOperator(Operator::Store),
            Token::Ident(name) => match Builtin::lookup(name) {
                Some(Builtin::Leave) if loop_depth == 0 => {
                    bail!("{} outside of a {} loop", Builtin::Leave, Keyword::Do)
                }
                Some(builtin) => AstNode::NodeBuiltin(builtin),
                None => match locals.iter().position(|l| l == name) {
                    Some(slot) => AstNode::NodeLocal(slot),
                    None => AstNode::NodeCall(name.clone()),
                },
            },
            Token::Kwd(Keyword::If) => {
                *index += 1;
                AstNode::NodeIf(Box::new(parse_if(tokens, index, locals, loop_depth)?))
            }
            Token::Kwd(Keyword::Do) => {
                *index += 1;
                AstNode::NodeDoLoop(Box::new(parse_do_loop(
                    tokens, index, locals, loop_depth,
                )?))
            }
        };

        // IF and DO already moved past their closing keyword
        if !matches!(node, AstNode::NodeIf(_) | AstNode::NodeDoLoop(_)) {
            *index += 1;
        }
        nodes.push(node_span_with(node, line, col));
    }

    Ok(nodes)
}

fn parse_if(
    tokens: &[TokenSpan],
    index: &mut usize,
    locals: &[String],
    loop_depth: usize,
) -> Result<NodeIf> {
    let then_block = parse_block(tokens, index, locals, loop_depth)?;

    let (else_at, else_block) = match peek(tokens, *index) {
        Token::Kwd(Keyword::Else) => {
            let at = position(tokens, *index);
            *index += 1;
            (Some(at), Some(parse_block(tokens, index, locals, loop_depth)?))
        }
        _ => (None, None),
    };

    let then_at = position(tokens, *index);
    expect(tokens, index, Token::Kwd(Keyword::Then))?;

    Ok(NodeIf {
        then_block,
        else_block,
        else_at,
        then_at,
    })
}

fn parse_do_loop(
    tokens: &[TokenSpan],
    index: &mut usize,
    locals: &[String],
    loop_depth: usize,
) -> Result<NodeDoLoop> {
    let body = parse_block(tokens, index, locals, loop_depth + 1)?;

    let loop_at = position(tokens, *index);
    expect(tokens, index, Token::Kwd(Keyword::Loop))?;

    Ok(NodeDoLoop { body, loop_at })
}

static EOF: Token = Token::Eof;

fn peek(tokens: &[TokenSpan], index: usize) -> &Token {
    tokens.get(index).map(|t| &t.token).unwrap_or(&EOF)
}

fn position(tokens: &[TokenSpan], index: usize) -> (usize, usize) {
    tokens
        .get(index)
        .or(tokens.last())
        .map(|t| (t.line, t.col))
        .unwrap_or((1, 1))
}

fn expect(tokens: &[TokenSpan], index: &mut usize, expected: Token) -> Result<()> {
    match peek(tokens, *index) {
        token if token == &expected => {
            *index += 1;
            Ok(())
        }
        other => bail!("Expected {}, got {}", expected, other),
    }
}

fn expect_ident<'a>(tokens: &'a [TokenSpan], index: &mut usize) -> Result<&'a str> {
    match peek(tokens, *index) {
        Token::Ident(s) => {
            *index += 1;
            Ok(s)
        }
        other_token => bail!("Expected identifier, got {}", other_token),
    }
}
