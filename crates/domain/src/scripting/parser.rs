//! Recursive-descent parser with construct whitelisting
//!
//! Validation happens while parsing: the first forbidden construct aborts with
//! [`ScriptError::Forbidden`], anything else unparseable with
//! [`ScriptError::Syntax`].
//!
//! Grammar (Lua-flavoured, accepting Python spellings):
//!
//! ```text
//! block      := { stmt (NEWLINE | ';') }
//! stmt       := if_stmt | exprs ['=' exprs | AUGOP expr]
//! if_stmt    := 'if' expr ('then'|':') block
//!               { ('elseif'|'elif') expr ('then'|':') block }
//!               ['else' [':'] block] 'end'
//! expr       := or ; or := and {'or' and} ; and := not {'and' not}
//! not        := 'not' not | cmp ; cmp := sum {CMPOP sum}
//! sum        := term {('+'|'-') term} ; term := unary {('*'|'/'|'//'|'%') unary}
//! unary      := ('-'|'+') unary | power ; power := postfix ['**' unary]
//! postfix    := primary {'[' expr ']' | '(' args ')'}
//! ```

use super::ast::{BinOp, Builtin, CmpOp, Expr, Program, Stmt, StmtKind, Target, UnaryOp};
use super::error::{ForbiddenConstruct, ScriptError};
use super::lexer::{tokenize, Spanned, Tok};

/// Words that close a block
const BLOCK_END: [&str; 4] = ["elif", "elseif", "else", "end"];

/// Deepest allowed nesting of brackets, prefix operators and `if` blocks.
pub const MAX_NESTING: usize = 64;

/// Parses and validates a script. Empty or whitespace-only source yields an
/// empty program.
pub fn parse(source: &str) -> Result<Program, ScriptError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
        nesting: 0,
    };
    let body = parser.block(&[])?;
    if parser.peek() != &Tok::Eof {
        return Err(parser.unexpected());
    }
    Ok(Program { body })
}

fn forbidden_keyword(word: &str) -> Option<ForbiddenConstruct> {
    use ForbiddenConstruct as F;
    let construct = match word {
        "import" | "from" => F::Import,
        "for" | "while" | "repeat" | "until" | "break" | "continue" => F::Loop,
        "def" | "function" | "return" => F::FunctionDefinition,
        "class" => F::ClassDefinition,
        "with" => F::With,
        "lambda" => F::Lambda,
        "try" | "except" | "finally" | "raise" => F::ExceptionHandling,
        "yield" | "await" | "async" => F::Generator,
        "global" | "nonlocal" | "local" => F::ScopeDeclaration,
        "del" | "assert" | "pass" | "goto" => F::Statement,
        _ => return None,
    };
    Some(construct)
}

fn is_reserved(word: &str) -> bool {
    matches!(
        word,
        "if" | "then"
            | "elif"
            | "elseif"
            | "else"
            | "end"
            | "and"
            | "or"
            | "not"
            | "in"
            | "is"
            | "true"
            | "false"
            | "True"
            | "False"
            | "nil"
            | "None"
    ) || forbidden_keyword(word).is_some()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    nesting: usize,
}

impl Parser {
    /// Goes one level deeper, refusing to pass [`MAX_NESTING`]. Operator
    /// chains count one level per operand, as they build left-deep trees.
    fn deepen(&mut self) -> Result<(), ScriptError> {
        if self.nesting >= MAX_NESTING {
            return Err(ScriptError::syntax(
                self.line(),
                format!("nesting deeper than {MAX_NESTING} levels"),
            ));
        }
        self.nesting += 1;
        Ok(())
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ScriptError>,
    ) -> Result<T, ScriptError> {
        self.deepen()?;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|s| &s.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at_word(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Name(name) if name == word)
    }

    fn peek_word(&self) -> Option<&str> {
        match self.peek() {
            Tok::Name(name) => Some(name.as_str()),
            _ => None,
        }
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), ScriptError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(ScriptError::syntax(
                self.line(),
                format!("expected {what}, found {}", self.peek().describe()),
            ))
        }
    }

    fn unexpected(&self) -> ScriptError {
        if let Some(construct) = self.peek_word().and_then(forbidden_keyword) {
            return ScriptError::forbidden(construct, self.line());
        }
        ScriptError::syntax(self.line(), format!("unexpected {}", self.peek().describe()))
    }

    fn block(&mut self, terminators: &[&str]) -> Result<Vec<Stmt>, ScriptError> {
        let mut body = Vec::new();
        loop {
            while matches!(self.peek(), Tok::Newline | Tok::Semicolon) {
                self.advance();
            }
            if self.peek() == &Tok::Eof {
                break;
            }
            if self.peek_word().is_some_and(|w| terminators.contains(&w)) {
                break;
            }
            body.push(self.statement()?);

            let closes_block = self.peek_word().is_some_and(|w| BLOCK_END.contains(&w));
            if matches!(self.peek(), Tok::Newline | Tok::Semicolon) {
                self.advance();
            } else if self.peek() != &Tok::Eof && !closes_block {
                return Err(self.unexpected());
            }
        }
        Ok(body)
    }

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.line();
        if let Some(word) = self.peek_word() {
            if let Some(construct) = forbidden_keyword(word) {
                return Err(ScriptError::forbidden(construct, line));
            }
            if word == "if" {
                self.advance();
                return self.nested(|p| p.if_statement(line));
            }
        }

        let first = self.expression_list()?;
        let kind = match self.peek().clone() {
            Tok::Assign => {
                self.advance();
                let target = Self::target(first, line)?;
                let value = self.expression_list()?;
                if self.peek() == &Tok::Assign {
                    return Err(ScriptError::syntax(line, "chained assignment is not supported"));
                }
                StmtKind::Assign { target, value }
            }
            Tok::AugAssign(op) => {
                self.advance();
                let target = Self::target(first, line)?;
                let value = self.expression()?;
                StmtKind::AugAssign {
                    target,
                    op: arithmetic_op(&op).ok_or_else(|| {
                        ScriptError::syntax(line, "unsupported augmented assignment")
                    })?,
                    value,
                }
            }
            _ => StmtKind::Expr(first),
        };
        Ok(Stmt { line, kind })
    }

    fn target(expr: Expr, line: usize) -> Result<Target, ScriptError> {
        match expr {
            Expr::Name(name) if !is_reserved(&name) => Ok(Target::Name(name)),
            Expr::Index { target, index } => match *target {
                Expr::Name(name) => Ok(Target::Index {
                    name,
                    index: *index,
                }),
                _ => Err(ScriptError::syntax(line, "only variables can be indexed on assignment")),
            },
            _ => Err(ScriptError::syntax(line, "cannot assign to this expression")),
        }
    }

    fn if_statement(&mut self, line: usize) -> Result<Stmt, ScriptError> {
        let mut branches = Vec::new();
        let mut otherwise = Vec::new();

        let condition = self.expression()?;
        self.expect_then()?;
        branches.push((condition, self.block(&BLOCK_END)?));

        loop {
            match self.peek_word() {
                Some("elif") | Some("elseif") => {
                    self.advance();
                    let condition = self.expression()?;
                    self.expect_then()?;
                    branches.push((condition, self.block(&BLOCK_END)?));
                }
                Some("else") => {
                    self.advance();
                    self.eat(&Tok::Colon);
                    otherwise = self.block(&["end"])?;
                    if !self.at_word("end") {
                        return Err(ScriptError::syntax(line, "'if' is missing its 'end'"));
                    }
                    self.advance();
                    break;
                }
                Some("end") => {
                    self.advance();
                    break;
                }
                _ => return Err(ScriptError::syntax(line, "'if' is missing its 'end'")),
            }
        }

        Ok(Stmt {
            line,
            kind: StmtKind::If {
                branches,
                otherwise,
            },
        })
    }

    fn expect_then(&mut self) -> Result<(), ScriptError> {
        if self.at_word("then") || self.peek() == &Tok::Colon {
            self.advance();
            return Ok(());
        }
        Err(ScriptError::syntax(
            self.line(),
            format!("expected 'then' after condition, found {}", self.peek().describe()),
        ))
    }

    /// One expression, or a bare comma list forming a tuple.
    fn expression_list(&mut self) -> Result<Expr, ScriptError> {
        let first = self.expression()?;
        if self.peek() != &Tok::Comma {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if matches!(
                self.peek(),
                Tok::Newline | Tok::Semicolon | Tok::Eof | Tok::Assign
            ) {
                break;
            }
            items.push(self.expression()?);
        }
        Ok(Expr::Sequence(items))
    }

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.nested(Self::or_expr)
    }

    fn or_expr(&mut self) -> Result<Expr, ScriptError> {
        let depth = self.nesting;
        let mut left = self.and_expr()?;
        while self.at_word("or") {
            self.advance();
            self.deepen()?;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.nesting = depth;
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ScriptError> {
        let depth = self.nesting;
        let mut left = self.not_expr()?;
        while self.at_word("and") {
            self.advance();
            self.deepen()?;
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.nesting = depth;
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ScriptError> {
        if self.at_word("not") {
            self.advance();
            let operand = self.nested(Self::not_expr)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        let first = self.additive()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::EqEq => CmpOp::Eq,
                Tok::NotEq => CmpOp::NotEq,
                Tok::Lt => CmpOp::Lt,
                Tok::Le => CmpOp::Le,
                Tok::Gt => CmpOp::Gt,
                Tok::Ge => CmpOp::Ge,
                Tok::Name(word) if word == "in" || word == "is" => {
                    return Err(ScriptError::syntax(
                        self.line(),
                        format!("operator '{word}' is not supported"),
                    ))
                }
                _ => break,
            };
            self.advance();
            rest.push((op, self.additive()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn additive(&mut self) -> Result<Expr, ScriptError> {
        let depth = self.nesting;
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let right = self.term()?;
            left = binary(op, left, right);
        }
        self.nesting = depth;
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ScriptError> {
        let depth = self.nesting;
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::DoubleSlash => BinOp::FloorDiv,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let right = self.unary()?;
            left = binary(op, left, right);
        }
        self.nesting = depth;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let op = match self.peek() {
            Tok::Minus => UnaryOp::Neg,
            Tok::Plus => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.advance();
        let operand = self.nested(Self::unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> Result<Expr, ScriptError> {
        let base = self.postfix()?;
        if self.eat(&Tok::DoubleStar) {
            let exponent = self.nested(Self::unary)?;
            return Ok(binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Tok::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    if self.peek() == &Tok::Colon {
                        return Err(ScriptError::syntax(self.line(), "slices are not supported"));
                    }
                    self.expect(Tok::RBracket, "']'")?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Tok::Dot => {
                    return Err(ScriptError::forbidden(
                        ForbiddenConstruct::AttributeAccess,
                        self.line(),
                    ))
                }
                Tok::LParen => {
                    expr = self.call(expr)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call(&mut self, callee: Expr) -> Result<Expr, ScriptError> {
        let line = self.line();
        let builtin = match &callee {
            Expr::Name(name) => Builtin::from_name(name),
            _ => None,
        }
        .ok_or_else(|| ScriptError::forbidden(ForbiddenConstruct::NonBuiltinCall, line))?;

        self.advance();
        let mut args = Vec::new();
        if !self.eat(&Tok::RParen) {
            loop {
                let arg = self.expression()?;
                if self.at_word("for") {
                    return Err(ScriptError::forbidden(ForbiddenConstruct::Generator, line));
                }
                if self.peek() == &Tok::Assign {
                    return Err(ScriptError::syntax(line, "keyword arguments are not supported"));
                }
                args.push(arg);
                if self.eat(&Tok::RParen) {
                    break;
                }
                self.expect(Tok::Comma, "',' or ')'")?;
                if self.eat(&Tok::RParen) {
                    break;
                }
            }
        }

        if args.len() != builtin.arity() {
            let plural = if builtin.arity() == 1 { "" } else { "s" };
            return Err(ScriptError::syntax(
                line,
                format!(
                    "{}() takes {} argument{plural}, got {}",
                    builtin.name(),
                    builtin.arity(),
                    args.len()
                ),
            ));
        }
        Ok(Expr::Call { builtin, args })
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        match self.advance() {
            Tok::Number(n) => Ok(Expr::Number(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Name(word) => match word.as_str() {
                "true" | "True" => Ok(Expr::Bool(true)),
                "false" | "False" => Ok(Expr::Bool(false)),
                "nil" | "None" => Ok(Expr::Nil),
                w => {
                    if let Some(construct) = forbidden_keyword(w) {
                        return Err(ScriptError::forbidden(construct, line));
                    }
                    if is_reserved(w) {
                        return Err(ScriptError::syntax(line, format!("unexpected '{w}'")));
                    }
                    Ok(Expr::Name(w.to_string()))
                }
            },
            Tok::LParen => self.sequence(Tok::RParen, ForbiddenConstruct::Generator, true),
            Tok::LBracket => self.sequence(Tok::RBracket, ForbiddenConstruct::Comprehension, false),
            Tok::LBrace => Err(ScriptError::forbidden(ForbiddenConstruct::DictLiteral, line)),
            other => Err(ScriptError::syntax(
                line,
                format!("unexpected {}", other.describe()),
            )),
        }
    }

    /// Body of `( ... )` or `[ ... ]` after the opening bracket. A single
    /// parenthesised expression without a comma is just grouping.
    fn sequence(
        &mut self,
        close: Tok,
        comprehension: ForbiddenConstruct,
        grouping: bool,
    ) -> Result<Expr, ScriptError> {
        if self.eat(&close) {
            return Ok(Expr::Sequence(Vec::new()));
        }
        let first = self.expression()?;
        if self.at_word("for") || self.at_word("async") {
            return Err(ScriptError::forbidden(comprehension, self.line()));
        }
        if grouping && self.eat(&close) {
            return Ok(first);
        }

        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if self.peek() == &close {
                break;
            }
            items.push(self.expression()?);
        }
        let expected = if close == Tok::RParen { "')'" } else { "']'" };
        self.expect(close, expected)?;
        Ok(Expr::Sequence(items))
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn arithmetic_op(tok: &Tok) -> Option<BinOp> {
    match tok {
        Tok::Plus => Some(BinOp::Add),
        Tok::Minus => Some(BinOp::Sub),
        Tok::Star => Some(BinOp::Mul),
        Tok::Slash => Some(BinOp::Div),
        Tok::DoubleSlash => Some(BinOp::FloorDiv),
        Tok::Percent => Some(BinOp::Mod),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ForbiddenConstruct as F;

    fn forbidden(source: &str) -> ForbiddenConstruct {
        match parse(source) {
            Err(ScriptError::Forbidden { construct, .. }) => construct,
            other => panic!("expected forbidden construct for {source:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_whitelisted_scripts_parse() {
        let scripts = [
            "",
            "   \n\t",
            "if hp < 10 then damage(2) end",
            "if hp < 10 then\n  damage(2)\nelse\n  heal(1)\nend",
            "if hp <= 0:\n say('down')\nelif hp < 3 then say('hurt') elseif x ~= 0 then move(-x, 0)\nelse:\n pass_count = 1\nend",
            "tint = (1, 0.5, 0)",
            "tint = 1, 0, 0",
            "tint[0] = tint[0] * 0.5",
            "hp += roll(6) // 2; max_hp *= 1",
            "set('mood', 'angry')",
            "trigger('onAlarm')",
            "x = -2 ** 2 % 3 - +1",
            "ok = not (hp > 3 and hp < 10) or name == \"Bob\"",
            "label = event['data']['from'][0]",
            "items = [1, 2, 3,]",
            "say('a' + \"b\") -- trailing comment",
        ];
        for script in scripts {
            assert!(parse(script).is_ok(), "{script:?}: {:?}", parse(script));
        }
    }

    #[test]
    fn test_every_forbidden_category() {
        assert_eq!(forbidden("import os"), F::Import);
        assert_eq!(forbidden("from os import path"), F::Import);
        assert_eq!(forbidden("for i in range(3): hp = 1"), F::Loop);
        assert_eq!(forbidden("while true do end"), F::Loop);
        assert_eq!(forbidden("def f(): return 1"), F::FunctionDefinition);
        assert_eq!(forbidden("function f() end"), F::FunctionDefinition);
        assert_eq!(forbidden("class A: x = 1"), F::ClassDefinition);
        assert_eq!(forbidden("with f: x = 1"), F::With);
        assert_eq!(forbidden("f = lambda: 1"), F::Lambda);
        assert_eq!(forbidden("try: x = 1"), F::ExceptionHandling);
        assert_eq!(forbidden("raise hp"), F::ExceptionHandling);
        assert_eq!(forbidden("x = hp.real"), F::AttributeAccess);
        assert_eq!(forbidden("d = {}"), F::DictLiteral);
        assert_eq!(forbidden("xs = [t for t in tint]"), F::Comprehension);
        assert_eq!(forbidden("xs = (t for t in tint)"), F::Generator);
        assert_eq!(forbidden("yield 1"), F::Generator);
        assert_eq!(forbidden("x = await hp"), F::Generator);
        assert_eq!(forbidden("global hp"), F::ScopeDeclaration);
        assert_eq!(forbidden("nonlocal hp"), F::ScopeDeclaration);
        assert_eq!(forbidden("del hp"), F::Statement);
        assert_eq!(forbidden("print('hi')"), F::NonBuiltinCall);
        assert_eq!(forbidden("__import__('os')"), F::NonBuiltinCall);
    }

    #[test]
    fn test_forbidden_inside_if_body() {
        let err = parse("if hp < 3 then\n  open('x')\nend").expect_err("must be rejected");
        assert_eq!(
            err,
            ScriptError::forbidden(ForbiddenConstruct::NonBuiltinCall, 2)
        );
    }

    #[test]
    fn test_syntax_errors() {
        for script in [
            "if hp < 3 then damage(1)",
            "damage(1, 2)",
            "x = ",
            "x = 1 y = 2",
            "1 = x",
            "say(text='hi')",
            "x = a if b else c",
            "x = tint[0:2]",
            "end",
        ] {
            assert!(
                matches!(parse(script), Err(ScriptError::Syntax { .. })),
                "{script:?}: {:?}",
                parse(script)
            );
        }
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        let deep = 20_000;
        for script in [
            format!("x = {}1{}", "(".repeat(deep), ")".repeat(deep)),
            format!("x = {}1{}", "[".repeat(deep), "]".repeat(deep)),
            format!("x = {}1", "-".repeat(deep)),
            format!("x = {}true", "not ".repeat(deep)),
            format!("x = 2{}", "**2".repeat(deep)),
            format!("x = 1{}", " + 1".repeat(deep)),
            format!("x = 1{}", " * 2".repeat(deep)),
            format!("x = a{}", " and a".repeat(deep)),
            format!("x = a{}", " or a".repeat(deep)),
            format!("{}say(1){}", "if true then ".repeat(deep), " end".repeat(deep)),
        ] {
            assert!(
                matches!(parse(&script), Err(ScriptError::Syntax { .. })),
                "{}...",
                &script[..40]
            );
        }
    }

    #[test]
    fn test_nesting_within_limit_parses() {
        let depth = MAX_NESTING / 2;
        let script = format!("x = {}1{}", "(".repeat(depth), ")".repeat(depth));
        assert!(parse(&script).is_ok());
        assert!(parse(&format!("x = 1{}", " + 1".repeat(depth))).is_ok());
        assert!(parse("if a then if b then if c then say(1) end end end").is_ok());
    }

    #[test]
    fn test_inline_if_shape() {
        let program = parse("if hp < 10 then damage(2) end").expect("parse");
        assert_eq!(program.body.len(), 1);
        let StmtKind::If {
            branches,
            otherwise,
        } = &program.body[0].kind
        else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 1);
        assert!(otherwise.is_empty());
        assert_eq!(
            branches[0].1[0].kind,
            StmtKind::Expr(Expr::Call {
                builtin: Builtin::Damage,
                args: vec![Expr::Number(2.0)]
            })
        );
    }
}
