//! Generic concrete parse tree.
//!
//! This is the contract between the grammar-driven parser and the AST
//! constructor: rule-labelled interior nodes whose children are either
//! subtrees or the tokens the grammar keeps. The tree says nothing about
//! precedence; operator chains arrive as flat `[operand, op, operand, ...]`
//! child lists.

use crate::ast::Pos;

/// Grammar rules, one per interior node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Start,
    FunctionDef,
    Params,
    Param,
    Block,
    RetStmt,
    NoOpStmt,
    ExprStmt,
    VarDeclStmt,
    VarAssStmt,
    IfStmt,
    ElseIfStmt,
    ElseStmt,
    AsStmt,
    Type,
    VoidType,
    DecimalType,
    BooleanType,
    CharType,
    StrType,
    Expr,
    OrExpr,
    AndExpr,
    Equality,
    Comparison,
    Formula,
    Term,
    Factor,
    RevExpr,
    NegExpr,
    DerefExpr,
    IdentifierExpr,
    ExecExpr,
}

/// Terminal classes. Literal and identifier terminals are turned into AST
/// nodes directly; the rest are kept as raw tokens for their parent rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Integer,
    String,
    BooleanLiteral,
    Identifier,
    Keyword,
    Operator,
    Punct,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub pos: Pos,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, pos: Pos) -> Self {
        Self { kind, text: text.into(), pos }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Token(Token),
    Tree(Tree),
}

impl Node {
    pub fn pos(&self) -> Pos {
        match self {
            Node::Token(token) => token.pos,
            Node::Tree(tree) => tree.pos,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub rule: Rule,
    pub children: Vec<Node>,
    pub pos: Pos,
}

impl Tree {
    pub fn new(rule: Rule, children: Vec<Node>, pos: Pos) -> Self {
        Self { rule, children, pos }
    }
}

impl From<Token> for Node {
    fn from(token: Token) -> Self {
        Node::Token(token)
    }
}

impl From<Tree> for Node {
    fn from(tree: Tree) -> Self {
        Node::Tree(tree)
    }
}
