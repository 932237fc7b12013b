#[cfg(test)]
mod tests {
    use crate::error::CompileError;
    use crate::tokens::*;
    use pretty_assertions::assert_eq;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input.as_bytes())
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    fn lexical_error(input: &str) -> CompileError {
        tokenize(input.as_bytes())
            .unwrap_err()
            .downcast::<CompileError>()
            .unwrap()
    }

    #[test]
    fn basic_test() {
        assert_eq!(
            tokenize("".as_bytes()).unwrap(),
            vec![TokenSpan {
                token: Token::Eof,
                line: 1,
                col: 1,
                start: 0,
                end: 0
            }]
        );
        assert_eq!(
            tokenize(": main 1 ;".as_bytes()).unwrap(),
            vec![
                TokenSpan {
                    token: Token::Colon,
                    line: 1,
                    col: 1,
                    start: 0,
                    end: 1
                },
                TokenSpan {
                    token: Token::Ident("main".to_string()),
                    line: 1,
                    col: 3,
                    start: 2,
                    end: 6
                },
                TokenSpan {
                    token: Token::Int(1),
                    line: 1,
                    col: 8,
                    start: 7,
                    end: 8
                },
                TokenSpan {
                    token: Token::SemiColon,
                    line: 1,
                    col: 10,
                    start: 9,
                    end: 10
                },
                TokenSpan {
                    token: Token::Eof,
                    line: 1,
                    col: 11,
                    start: 10,
                    end: 10
                },
            ]
        );
    }

    #[test]
    fn test_positions_across_lines() {
        let tokens = tokenize(":\n\t x\r\n  ;".as_bytes()).unwrap();
        let positions = tokens
            .iter()
            .map(|t| (t.line, t.col))
            .collect::<Vec<_>>();
        assert_eq!(positions, vec![(1, 1), (2, 3), (3, 3), (3, 4)]);
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("+ - * / % . @ ! [ ]"),
            vec![
                Token::Add,
                Token::Sub,
                Token::Mul,
                Token::Div,
                Token::Mod,
                Token::Dot,
                Token::Fetch,
                Token::Store,
                Token::OpenBracket,
                Token::CloseBracket,
                Token::Eof
            ]
        );
        // no separator needed between punctuation
        assert_eq!(
            kinds("1 2+."),
            vec![Token::Int(1), Token::Int(2), Token::Add, Token::Dot, Token::Eof]
        );
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            kinds("IF ELSE THEN DO LOOP"),
            vec![
                Token::Kwd(Keyword::If),
                Token::Kwd(Keyword::Else),
                Token::Kwd(Keyword::Then),
                Token::Kwd(Keyword::Do),
                Token::Kwd(Keyword::Loop),
                Token::Eof
            ]
        );
        // only whole identifiers are keywords
        assert_eq!(
            kinds("IFFY DONE LOOPER if"),
            vec![
                Token::Ident("IFFY".to_string()),
                Token::Ident("DONE".to_string()),
                Token::Ident("LOOPER".to_string()),
                Token::Ident("if".to_string()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(
            kinds("_a b_2 Sq"),
            vec![
                Token::Ident("_a".to_string()),
                Token::Ident("b_2".to_string()),
                Token::Ident("Sq".to_string()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_integers() {
        assert_eq!(
            kinds("0 42 9223372036854775807"),
            vec![
                Token::Int(0),
                Token::Int(42),
                Token::Int(i64::MAX),
                Token::Eof
            ]
        );
        // a minus sign is always the subtraction operator
        assert_eq!(kinds("-5"), vec![Token::Sub, Token::Int(5), Token::Eof]);
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            kinds("1 \\ a comment ; 2\n3"),
            vec![Token::Int(1), Token::Int(3), Token::Eof]
        );
        assert_eq!(
            kinds("1 ( a\nmultiline comment ) 2"),
            vec![Token::Int(1), Token::Int(2), Token::Eof]
        );
        let tokens = tokenize("( x\n ) 7".as_bytes()).unwrap();
        assert_eq!((tokens[0].line, tokens[0].col), (2, 4));
        // trailing line comment without newline
        assert_eq!(kinds("1 \\"), vec![Token::Int(1), Token::Eof]);
    }

    #[test]
    fn test_lexer_is_lazy() {
        let mut lexer = Lexer::new("1 2 $".as_bytes());
        assert_eq!(lexer.next_token().unwrap().token, Token::Int(1));
        assert_eq!(lexer.next_token().unwrap().token, Token::Int(2));
        assert!(lexer.next_token().is_err());

        lexer.rewind();
        assert_eq!(lexer.next_token().unwrap().token, Token::Int(1));

        let mut lexer = Lexer::new("".as_bytes());
        assert_eq!(lexer.next_token().unwrap().token, Token::Eof);
        assert_eq!(lexer.next_token().unwrap().token, Token::Eof);
    }

    #[test]
    fn test_lexical_errors() {
        assert_eq!(
            lexical_error(": main 1 $ ;"),
            CompileError::Lexical {
                message: "Unknown token found: $".to_string(),
                line: 1,
                col: 10
            }
        );
        assert_eq!(
            lexical_error("1\n  99999999999999999999"),
            CompileError::Lexical {
                message: "Integer literal 99999999999999999999 is out of range".to_string(),
                line: 2,
                col: 3
            }
        );
        assert_eq!(
            lexical_error("1 ( never closed"),
            CompileError::Lexical {
                message: "Unterminated comment".to_string(),
                line: 1,
                col: 3
            }
        );
        assert_eq!(
            lexical_error("(x)").to_string(),
            "Unknown token found: ( at line 1 col 1"
        );
    }
}
