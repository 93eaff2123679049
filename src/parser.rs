//! Regex-driven tokenizer plus a recursive-descent recognizer for 1eft source.
//!
//! The recognizer knows the grammar's shape but nothing about precedence
//! folding or literal decoding: it emits a generic [`Tree`] whose operator
//! chains are flat, exactly what the AST constructor consumes.

use regex::Regex;

use crate::ast::Pos;
use crate::error::{CompileError, CompileResult};
use crate::syntax::{Node, Rule, Token, TokenKind, Tree};

const KEYWORDS: &[&str] = &[
    "fvnc", "ret", "n@p", "if", "e1if", "e1se", "as", "rev", "neg", "addr", "trve", "fa1se", "v@1d",
    "dec", "b@@1", "char", "str",
];

const TYPE_KEYWORDS: &[(&str, Rule)] = &[
    ("v@1d", Rule::VoidType),
    ("dec", Rule::DecimalType),
    ("b@@1", Rule::BooleanType),
    ("char", Rule::CharType),
    ("str", Rule::StrType),
];

/// Operator symbols per precedence level, loosest first.
const LEVELS: &[(Rule, &[&str])] = &[
    (Rule::OrExpr, &["@r"]),
    (Rule::AndExpr, &["@@"]),
    (Rule::Equality, &["eq", "req"]),
    (Rule::Comparison, &["1t", "1te", "gt", "gte"]),
    (Rule::Formula, &["a", "s"]),
    (Rule::Term, &["t", "d", "%%"]),
];

/// Parse a complete 1eft program into its concrete parse tree.
pub fn parse(src: &str) -> CompileResult<Tree> {
    let lexemes = tokenize(src)?;
    let end = end_pos(src);
    let mut parser = Parser { lexemes, cursor: 0, end };
    parser.start()
}

// =============== tokenizer ==================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Integer,
    Str,
    Punct,
    SymbolOp,
    Word,
}

#[derive(Debug, Clone)]
struct Lexeme {
    class: Class,
    text: String,
    pos: Pos,
}

fn tokenize(src: &str) -> CompileResult<Vec<Lexeme>> {
    let re = Regex::new(concat!(
        r"(?P<ws>\s+)",
        r"|(?P<comment>//[^\n]*)",
        r"|(?P<int>~~[0-9@a-d]*~~)",
        r"|(?P<str>`(?:[^`\\]|\\.)*`)",
        r"|(?P<op>%%|@@|@r)",
        r"|(?P<punct>%s|!s|\$|\(|\)|,|=|#)",
        r"|(?P<word>[A-Za-z0-9_][A-Za-z0-9_@]*)",
    ))
    .map_err(|e| CompileError::internal(format!("tokenizer pattern: {e}"), Pos::default()))?;

    let lines = LineIndex::new(src);
    let mut lexemes = Vec::new();
    let mut offset = 0;
    while offset < src.len() {
        let caps = match re.captures_at(src, offset) {
            Some(caps) if caps.get(0).is_some_and(|m| m.start() == offset) => caps,
            _ => {
                let bad = src[offset..].chars().next().unwrap_or('\0');
                return Err(CompileError::syntax(
                    format!("unexpected character `{bad}`"),
                    lines.pos(offset),
                ));
            }
        };
        let whole = caps.get(0).map_or(offset, |m| m.end());
        let class = if caps.name("ws").is_some() || caps.name("comment").is_some() {
            None
        } else if caps.name("int").is_some() {
            Some(Class::Integer)
        } else if caps.name("str").is_some() {
            Some(Class::Str)
        } else if caps.name("op").is_some() {
            Some(Class::SymbolOp)
        } else if caps.name("punct").is_some() {
            Some(Class::Punct)
        } else {
            Some(Class::Word)
        };
        if let Some(class) = class {
            lexemes.push(Lexeme {
                class,
                text: src[offset..whole].to_string(),
                pos: lines.pos(offset),
            });
        }
        offset = whole;
    }
    Ok(lexemes)
}

/// Byte offset to 1-based line/column lookup.
struct LineIndex<'a> {
    src: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(src: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(src.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { src, starts }
    }

    fn pos(&self, offset: usize) -> Pos {
        let line = self.starts.partition_point(|&start| start <= offset);
        let start = self.starts[line - 1];
        let column = self.src[start..offset].chars().count() + 1;
        Pos::new(line as u32, column as u32)
    }
}

fn end_pos(src: &str) -> Pos {
    LineIndex::new(src).pos(src.len())
}

// =============== recognizer ==================

struct Parser {
    lexemes: Vec<Lexeme>,
    cursor: usize,
    end: Pos,
}

impl Parser {
    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.cursor)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Lexeme> {
        self.lexemes.get(self.cursor + ahead)
    }

    fn here(&self) -> Pos {
        self.peek().map_or(self.end, |lx| lx.pos)
    }

    fn is(&self, text: &str) -> bool {
        self.peek().is_some_and(|lx| lx.text == text && lx.class != Class::Str)
    }

    fn bump(&mut self) -> CompileResult<Lexeme> {
        let lexeme = self
            .peek()
            .cloned()
            .ok_or_else(|| CompileError::syntax("unexpected end of input", self.end))?;
        self.cursor += 1;
        Ok(lexeme)
    }

    /// Consume `text` and return it as a token of the given kind.
    fn expect(&mut self, text: &str, kind: TokenKind) -> CompileResult<Token> {
        if self.is(text) {
            let lexeme = self.bump()?;
            return Ok(Token::new(kind, lexeme.text, lexeme.pos));
        }
        Err(self.unexpected(&format!("`{text}`")))
    }

    fn unexpected(&self, wanted: &str) -> CompileError {
        match self.peek() {
            Some(lx) => {
                CompileError::syntax(format!("expected {wanted}, found `{}`", lx.text), lx.pos)
            }
            None => {
                CompileError::syntax(format!("expected {wanted}, found end of input"), self.end)
            }
        }
    }

    fn at_identifier(&self) -> bool {
        self.peek().is_some_and(is_identifier)
    }

    fn identifier(&mut self) -> CompileResult<Token> {
        if !self.at_identifier() {
            return Err(self.unexpected("an identifier"));
        }
        let lexeme = self.bump()?;
        Ok(Token::new(TokenKind::Identifier, lexeme.text, lexeme.pos))
    }

    fn at_type(&self) -> bool {
        TYPE_KEYWORDS.iter().any(|(kw, _)| self.is(kw))
    }

    fn start(&mut self) -> CompileResult<Tree> {
        let pos = self.here();
        let mut functions = Vec::new();
        while self.peek().is_some() {
            functions.push(Node::Tree(self.function_def()?));
        }
        if functions.is_empty() {
            return Err(CompileError::syntax("expected at least one function", pos));
        }
        Ok(Tree::new(Rule::Start, functions, pos))
    }

    fn function_def(&mut self) -> CompileResult<Tree> {
        let keyword = self.expect("fvnc", TokenKind::Keyword)?;
        let pos = keyword.pos;
        let ty = self.ty()?;
        let name = self.identifier()?;

        let params_pos = self.here();
        self.expect("(", TokenKind::Punct)?;
        let mut params = Vec::new();
        if !self.is(")") {
            loop {
                let param_ty = self.ty()?;
                let param_pos = param_ty.pos;
                let param_name = self.identifier()?;
                params.push(Node::Tree(Tree::new(
                    Rule::Param,
                    vec![param_ty.into(), param_name.into()],
                    param_pos,
                )));
                if !self.is(",") {
                    break;
                }
                self.bump()?;
            }
        }
        self.expect(")", TokenKind::Punct)?;
        let params = Tree::new(Rule::Params, params, params_pos);

        let body = self.block()?;
        Ok(Tree::new(
            Rule::FunctionDef,
            vec![keyword.into(), ty.into(), name.into(), params.into(), body.into()],
            pos,
        ))
    }

    fn ty(&mut self) -> CompileResult<Tree> {
        let pos = self.here();
        let Some(&(keyword, rule)) = TYPE_KEYWORDS.iter().find(|(kw, _)| self.is(kw)) else {
            return Err(self.unexpected("a type"));
        };
        let token = self.expect(keyword, TokenKind::Keyword)?;
        let mut children = vec![Node::Tree(Tree::new(rule, vec![token.into()], pos))];
        while self.is("#") {
            children.push(self.expect("#", TokenKind::Operator)?.into());
        }
        Ok(Tree::new(Rule::Type, children, pos))
    }

    fn block(&mut self) -> CompileResult<Tree> {
        let open = self.expect("%s", TokenKind::Punct)?;
        let pos = open.pos;
        let mut children = vec![Node::Token(open)];
        while !self.is("!s") {
            if self.peek().is_none() {
                return Err(self.unexpected("`!s`"));
            }
            children.push(self.statement()?.into());
        }
        children.push(self.expect("!s", TokenKind::Punct)?.into());
        Ok(Tree::new(Rule::Block, children, pos))
    }

    fn statement(&mut self) -> CompileResult<Tree> {
        let pos = self.here();
        if self.is("ret") {
            let keyword = self.expect("ret", TokenKind::Keyword)?;
            let mut children = vec![Node::Token(keyword)];
            if !self.is("$") {
                children.push(self.expr()?.into());
            }
            children.push(self.expect("$", TokenKind::Punct)?.into());
            return Ok(Tree::new(Rule::RetStmt, children, pos));
        }
        if self.is("n@p") {
            let keyword = self.expect("n@p", TokenKind::Keyword)?;
            let end = self.expect("$", TokenKind::Punct)?;
            return Ok(Tree::new(Rule::NoOpStmt, vec![keyword.into(), end.into()], pos));
        }
        if self.is("if") {
            return self.if_stmt();
        }
        if self.is("as") {
            self.bump()?;
            let condition = self.expr()?;
            let body = self.block()?;
            return Ok(Tree::new(Rule::AsStmt, vec![condition.into(), body.into()], pos));
        }
        if self.at_type() {
            let ty = self.ty()?;
            let name = self.identifier()?;
            self.expect("$", TokenKind::Punct)?;
            return Ok(Tree::new(Rule::VarDeclStmt, vec![ty.into(), name.into()], pos));
        }
        if self.at_identifier() && self.peek_at(1).is_some_and(|lx| lx.text == "=") {
            let name = self.identifier()?;
            self.bump()?;
            let value = self.expr()?;
            self.expect("$", TokenKind::Punct)?;
            return Ok(Tree::new(Rule::VarAssStmt, vec![name.into(), value.into()], pos));
        }
        if self.is("#") {
            let checkpoint = self.cursor;
            let target = self.unary()?;
            if self.is("=") {
                self.bump()?;
                let value = self.expr()?;
                self.expect("$", TokenKind::Punct)?;
                return Ok(Tree::new(Rule::VarAssStmt, vec![target.into(), value.into()], pos));
            }
            self.cursor = checkpoint;
        }

        let expr = self.expr()?;
        self.expect("$", TokenKind::Punct)?;
        Ok(Tree::new(Rule::ExprStmt, vec![expr.into()], pos))
    }

    fn if_stmt(&mut self) -> CompileResult<Tree> {
        let pos = self.here();
        self.expect("if", TokenKind::Keyword)?;
        let condition = self.expr()?;
        let body = self.block()?;
        let mut children = vec![Node::Tree(condition), Node::Tree(body)];

        while self.is("e1if") {
            let else_if_pos = self.here();
            self.bump()?;
            let condition = self.expr()?;
            let body = self.block()?;
            children.push(Node::Tree(Tree::new(
                Rule::ElseIfStmt,
                vec![condition.into(), body.into()],
                else_if_pos,
            )));
        }
        if self.is("e1se") {
            let else_pos = self.here();
            self.bump()?;
            let body = self.block()?;
            children.push(Node::Tree(Tree::new(Rule::ElseStmt, vec![body.into()], else_pos)));
        }
        Ok(Tree::new(Rule::IfStmt, children, pos))
    }

    fn expr(&mut self) -> CompileResult<Tree> {
        let pos = self.here();
        let inner = self.level(0)?;
        Ok(Tree::new(Rule::Expr, vec![inner.into()], pos))
    }

    /// One binary precedence level, kept as a flat operand/operator chain.
    fn level(&mut self, depth: usize) -> CompileResult<Tree> {
        let Some(&(rule, symbols)) = LEVELS.get(depth) else {
            return self.unary();
        };
        let pos = self.here();
        let mut children = vec![Node::Tree(self.level(depth + 1)?)];
        while let Some(symbol) = symbols.iter().find(|symbol| self.is(symbol)) {
            children.push(self.expect(symbol, TokenKind::Operator)?.into());
            children.push(self.level(depth + 1)?.into());
        }
        Ok(Tree::new(rule, children, pos))
    }

    fn unary(&mut self) -> CompileResult<Tree> {
        let pos = self.here();
        if self.is("rev") {
            self.bump()?;
            let operand = self.unary()?;
            return Ok(Tree::new(Rule::RevExpr, vec![operand.into()], pos));
        }
        if self.is("neg") {
            self.bump()?;
            let operand = self.unary()?;
            return Ok(Tree::new(Rule::NegExpr, vec![operand.into()], pos));
        }
        if self.is("#") {
            let marker = self.expect("#", TokenKind::Operator)?;
            let operand = self.unary()?;
            return Ok(Tree::new(Rule::DerefExpr, vec![marker.into(), operand.into()], pos));
        }
        self.factor()
    }

    fn factor(&mut self) -> CompileResult<Tree> {
        let pos = self.here();
        let child: Node = match self.peek().map(|lx| lx.class) {
            Some(Class::Integer) => {
                let lexeme = self.bump()?;
                Token::new(TokenKind::Integer, lexeme.text, lexeme.pos).into()
            }
            Some(Class::Str) => {
                let lexeme = self.bump()?;
                Token::new(TokenKind::String, lexeme.text, lexeme.pos).into()
            }
            _ if self.is("trve") || self.is("fa1se") => {
                let lexeme = self.bump()?;
                Token::new(TokenKind::BooleanLiteral, lexeme.text, lexeme.pos).into()
            }
            _ if self.is("(") => {
                self.bump()?;
                let inner = self.expr()?;
                self.expect(")", TokenKind::Punct)?;
                inner.into()
            }
            _ if self.is("addr") => {
                let keyword = self.expect("addr", TokenKind::Keyword)?;
                let name = self.identifier()?;
                Tree::new(Rule::IdentifierExpr, vec![keyword.into(), name.into()], pos).into()
            }
            _ if self.at_identifier() && self.peek_at(1).is_some_and(|lx| lx.text == "(") => {
                self.exec_expr()?.into()
            }
            _ if self.at_identifier() => {
                let name = self.identifier()?;
                Tree::new(Rule::IdentifierExpr, vec![name.into()], pos).into()
            }
            _ => return Err(self.unexpected("an expression")),
        };
        Ok(Tree::new(Rule::Factor, vec![child], pos))
    }

    fn exec_expr(&mut self) -> CompileResult<Tree> {
        let name = self.identifier()?;
        let pos = name.pos;
        self.expect("(", TokenKind::Punct)?;
        let mut children = vec![Node::Token(name)];
        if !self.is(")") {
            loop {
                children.push(self.expr()?.into());
                if !self.is(",") {
                    break;
                }
                self.bump()?;
            }
        }
        self.expect(")", TokenKind::Punct)?;
        Ok(Tree::new(Rule::ExecExpr, children, pos))
    }
}

fn is_identifier(lexeme: &Lexeme) -> bool {
    lexeme.class == Class::Word
        && !KEYWORDS.contains(&lexeme.text.as_str())
        && lexeme
            .text
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}
