//! Parse tree to AST transformation.
//!
//! Children are transformed before their parent, so every rule handler sees
//! already-built AST pieces. The handlers are purely shape-directed: no type
//! checking happens here. A tree whose shape does not match its rule is a
//! defect in whatever produced it and is reported as an internal error.

use crate::ast::{
    AssignTarget, BinaryOp, Block, ElseIf, ExprKind, Expression, FunctionDef, Ident, IfStatement,
    Param, Pos, Program, Statement, StmtKind, Type, TypeKind,
};
use crate::digits;
use crate::error::{CompileError, CompileResult};
use crate::syntax::{Node, Rule, Token, TokenKind, Tree};

const ADDRESS_OF_SYMBOL: &str = "addr";
const POINTER_SYMBOL: &str = "#";
const TRUE_SYMBOL: &str = "trve";

const OPERATORS: &[(Rule, &str, BinaryOp)] = &[
    (Rule::Term, "t", BinaryOp::Mul),
    (Rule::Term, "d", BinaryOp::Div),
    (Rule::Term, "%%", BinaryOp::Mod),
    (Rule::Formula, "a", BinaryOp::Add),
    (Rule::Formula, "s", BinaryOp::Sub),
    (Rule::Comparison, "1t", BinaryOp::LessThan),
    (Rule::Comparison, "1te", BinaryOp::LessThanEqual),
    (Rule::Comparison, "gt", BinaryOp::GreaterThan),
    (Rule::Comparison, "gte", BinaryOp::GreaterThanEqual),
    (Rule::Equality, "eq", BinaryOp::Equals),
    (Rule::Equality, "req", BinaryOp::RevEquals),
    (Rule::AndExpr, "@@", BinaryOp::And),
    (Rule::OrExpr, "@r", BinaryOp::Or),
];

/// Build the AST for a whole program from its parse tree.
pub fn construct(tree: &Tree) -> CompileResult<Program> {
    match transform(tree)? {
        Item::Program(program) => Ok(program),
        _ => Err(CompileError::internal("parse tree root is not a program", tree.pos)),
    }
}

/// Intermediate results handed from children to their parent rule.
#[derive(Debug)]
enum Item {
    Token(Token),
    Ident(Ident),
    Expr(Expression),
    Stmt(Statement),
    Type(Type),
    Param(Param),
    Params(Vec<Param>),
    Block(Block),
    ElseIf(ElseIf),
    Else(Block),
    Function(FunctionDef),
    Program(Program),
}

fn visit(node: &Node) -> CompileResult<Item> {
    match node {
        Node::Tree(tree) => transform(tree),
        Node::Token(token) => terminal(token),
    }
}

/// Terminal callbacks: literals and identifiers become AST nodes right away.
fn terminal(token: &Token) -> CompileResult<Item> {
    let pos = token.pos;
    Ok(match token.kind {
        TokenKind::Integer => {
            let value = digits::decode(&token.text)
                .map_err(|source| CompileError::Decode { source, pos })?;
            Item::Expr(Expression::new(ExprKind::DecimalLiteral(value), pos))
        }
        TokenKind::String => {
            Item::Expr(Expression::new(ExprKind::StringLiteral(unescape(&token.text)), pos))
        }
        TokenKind::BooleanLiteral => {
            Item::Expr(Expression::new(ExprKind::BooleanLiteral(token.text == TRUE_SYMBOL), pos))
        }
        TokenKind::Identifier => Item::Ident(Ident { name: token.text.clone(), pos }),
        TokenKind::Keyword | TokenKind::Operator | TokenKind::Punct => Item::Token(token.clone()),
    })
}

/// Strip the backtick delimiters and resolve `\n`, `\t` and `\\`. Any other
/// backslash sequence is kept verbatim.
fn unescape(literal: &str) -> String {
    let body = literal
        .strip_prefix('`')
        .and_then(|rest| rest.strip_suffix('`'))
        .unwrap_or(literal);

    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            _ => {
                out.push('\\');
                continue;
            }
        }
        chars.next();
    }
    out
}

fn transform(tree: &Tree) -> CompileResult<Item> {
    let items = tree.children.iter().map(visit).collect::<CompileResult<Vec<_>>>()?;
    let shape = Shape { rule: tree.rule, pos: tree.pos };
    let pos = tree.pos;

    Ok(match tree.rule {
        Rule::Start => {
            if items.is_empty() {
                return Err(shape.malformed());
            }
            let functions = items
                .into_iter()
                .map(|item| match item {
                    Item::Function(func) => Ok(func),
                    _ => Err(shape.malformed()),
                })
                .collect::<CompileResult<Vec<_>>>()?;
            let pos = functions.first().map_or(pos, |f| f.pos);
            Item::Program(Program { functions, pos })
        }

        Rule::FunctionDef => match <[Item; 5]>::try_from(items) {
            Ok([
                Item::Token(keyword),
                Item::Type(return_type),
                Item::Ident(name),
                Item::Params(params),
                Item::Block(body),
            ]) => Item::Function(FunctionDef {
                return_type,
                name,
                params,
                body,
                pos: keyword.pos,
            }),
            _ => return Err(shape.malformed()),
        },

        Rule::Params => Item::Params(
            items
                .into_iter()
                .map(|item| match item {
                    Item::Param(param) => Ok(param),
                    _ => Err(shape.malformed()),
                })
                .collect::<CompileResult<Vec<_>>>()?,
        ),

        Rule::Param => match <[Item; 2]>::try_from(items) {
            Ok([Item::Type(ty), Item::Ident(name)]) => Item::Param(Param { pos: ty.pos, ty, name }),
            _ => return Err(shape.malformed()),
        },

        Rule::Block => {
            let mut items = items.into_iter();
            let Some(Item::Token(open)) = items.next() else {
                return Err(shape.malformed());
            };
            let Some(Item::Token(_close)) = items.next_back() else {
                return Err(shape.malformed());
            };
            let statements = items
                .map(|item| match item {
                    Item::Stmt(stmt) => Ok(stmt),
                    _ => Err(shape.malformed()),
                })
                .collect::<CompileResult<Vec<_>>>()?;
            Item::Block(Block { statements, pos: open.pos })
        }

        Rule::RetStmt => {
            let stmt = match <[Item; 3]>::try_from(items) {
                Ok([Item::Token(_), Item::Expr(value), Item::Token(_)]) => {
                    Statement { pos: value.pos, kind: StmtKind::Return(Some(value)) }
                }
                Ok(_) => return Err(shape.malformed()),
                Err(items) => match <[Item; 2]>::try_from(items) {
                    Ok([Item::Token(keyword), Item::Token(_)]) => {
                        Statement { pos: keyword.pos, kind: StmtKind::Return(None) }
                    }
                    _ => return Err(shape.malformed()),
                },
            };
            Item::Stmt(stmt)
        }

        Rule::NoOpStmt => match <[Item; 2]>::try_from(items) {
            Ok([Item::Token(keyword), Item::Token(_)]) => {
                Item::Stmt(Statement { kind: StmtKind::NoOp, pos: keyword.pos })
            }
            _ => return Err(shape.malformed()),
        },

        Rule::ExprStmt => {
            let expr = shape.single_expr(items)?;
            Item::Stmt(Statement { pos: expr.pos, kind: StmtKind::Expression(expr) })
        }

        Rule::VarDeclStmt => match <[Item; 2]>::try_from(items) {
            Ok([Item::Type(ty), Item::Ident(name)]) => Item::Stmt(Statement {
                pos: ty.pos,
                kind: StmtKind::VarDecl { ty, name },
            }),
            _ => return Err(shape.malformed()),
        },

        Rule::VarAssStmt => {
            let items = <[Item; 2]>::try_from(items).map_err(|_| shape.malformed())?;
            let [target, Item::Expr(value)] = items else {
                return Err(shape.malformed());
            };
            let target = match target {
                Item::Ident(name) => AssignTarget::Name(name),
                Item::Expr(Expression { kind: ExprKind::Deref(pointer), pos }) => {
                    AssignTarget::Deref { pointer: *pointer, pos }
                }
                _ => return Err(shape.malformed()),
            };
            let pos = match &target {
                AssignTarget::Name(name) => name.pos,
                AssignTarget::Deref { pos, .. } => *pos,
            };
            Item::Stmt(Statement { kind: StmtKind::VarAss { target, value }, pos })
        }

        Rule::IfStmt => {
            let mut items = items.into_iter();
            let (condition, body) = (items.next(), items.next());
            let (Some(Item::Expr(condition)), Some(Item::Block(body))) = (condition, body) else {
                return Err(shape.malformed());
            };
            let mut else_ifs = Vec::new();
            let mut else_body = None;
            for item in items {
                match item {
                    Item::ElseIf(else_if) if else_body.is_none() => else_ifs.push(else_if),
                    Item::Else(block) if else_body.is_none() => else_body = Some(block),
                    _ => return Err(shape.malformed()),
                }
            }
            Item::Stmt(Statement {
                pos: condition.pos,
                kind: StmtKind::If(IfStatement { condition, body, else_ifs, else_body }),
            })
        }

        Rule::ElseIfStmt => match <[Item; 2]>::try_from(items) {
            Ok([Item::Expr(condition), Item::Block(body)]) => {
                Item::ElseIf(ElseIf { pos: condition.pos, condition, body })
            }
            _ => return Err(shape.malformed()),
        },

        Rule::ElseStmt => match <[Item; 1]>::try_from(items) {
            Ok([Item::Block(block)]) => Item::Else(block),
            _ => return Err(shape.malformed()),
        },

        Rule::AsStmt => match <[Item; 2]>::try_from(items) {
            Ok([Item::Expr(condition), Item::Block(body)]) => Item::Stmt(Statement {
                pos: condition.pos,
                kind: StmtKind::As { condition, body },
            }),
            _ => return Err(shape.malformed()),
        },

        Rule::Type => {
            let mut items = items.into_iter();
            let Some(Item::Type(mut ty)) = items.next() else {
                return Err(shape.malformed());
            };
            for item in items {
                match item {
                    Item::Token(marker) if marker.text == POINTER_SYMBOL => {
                        ty = Type { kind: TypeKind::PointerOf(Box::new(ty)), pos: marker.pos };
                    }
                    _ => return Err(shape.malformed()),
                }
            }
            Item::Type(ty)
        }

        Rule::VoidType => Item::Type(shape.base_type(items, TypeKind::Void)?),
        Rule::DecimalType => Item::Type(shape.base_type(items, TypeKind::Decimal)?),
        Rule::BooleanType => Item::Type(shape.base_type(items, TypeKind::Boolean)?),
        Rule::CharType => Item::Type(shape.base_type(items, TypeKind::Char)?),
        Rule::StrType => Item::Type(shape.base_type(items, TypeKind::StrPtr)?),

        Rule::Expr | Rule::Factor => Item::Expr(shape.single_expr(items)?),

        Rule::OrExpr
        | Rule::AndExpr
        | Rule::Equality
        | Rule::Comparison
        | Rule::Formula
        | Rule::Term => Item::Expr(fold_chain(&shape, items)?),

        Rule::RevExpr => {
            let operand = shape.single_expr(items)?;
            let pos = operand.pos;
            Item::Expr(Expression::new(ExprKind::Rev(Box::new(operand)), pos))
        }

        // No negate node exists: `neg x` is `0 s x` at the operand's position.
        Rule::NegExpr => {
            let operand = shape.single_expr(items)?;
            let pos = operand.pos;
            let zero = Expression::new(ExprKind::DecimalLiteral(0), pos);
            Item::Expr(Expression::binary(BinaryOp::Sub, zero, operand, pos))
        }

        Rule::DerefExpr => match <[Item; 2]>::try_from(items) {
            Ok([Item::Token(marker), Item::Expr(inner)]) if marker.text == POINTER_SYMBOL => {
                Item::Expr(Expression::new(ExprKind::Deref(Box::new(inner)), marker.pos))
            }
            _ => return Err(shape.malformed()),
        },

        Rule::IdentifierExpr => match items.as_slice() {
            [Item::Ident(name)] => {
                Item::Expr(Expression::new(ExprKind::Identifier(name.clone()), name.pos))
            }
            [Item::Token(keyword), Item::Ident(name)] if keyword.text == ADDRESS_OF_SYMBOL => {
                Item::Expr(Expression::new(ExprKind::AddressOf(name.clone()), keyword.pos))
            }
            _ => return Err(shape.malformed()),
        },

        Rule::ExecExpr => {
            let mut items = items.into_iter();
            let Some(Item::Ident(callee)) = items.next() else {
                return Err(shape.malformed());
            };
            let args = items
                .map(|item| match item {
                    Item::Expr(arg) => Ok(arg),
                    _ => Err(shape.malformed()),
                })
                .collect::<CompileResult<Vec<_>>>()?;
            let pos = callee.pos;
            Item::Expr(Expression::new(ExprKind::Exec { callee, args }, pos))
        }
    })
}

/// Fold a flat `[operand, op, operand, ...]` chain left-associatively by
/// peeling off the last operator/operand pair and folding the prefix, so
/// `a s b a c` becomes `(a s b) a c`.
fn fold_chain(shape: &Shape, mut items: Vec<Item>) -> CompileResult<Expression> {
    if items.len() == 1 {
        return shape.single_expr(items);
    }
    if items.len() < 3 || items.len() % 2 == 0 {
        return Err(shape.malformed());
    }

    let (Some(Item::Expr(rhs)), Some(Item::Token(op))) = (items.pop(), items.pop()) else {
        return Err(shape.malformed());
    };
    let binary = OPERATORS
        .iter()
        .find(|(rule, symbol, _)| *rule == shape.rule && *symbol == op.text)
        .map(|(_, _, binary)| *binary)
        .ok_or_else(|| {
            CompileError::internal(
                format!("unrecognized operator `{}` in {:?}", op.text, shape.rule),
                op.pos,
            )
        })?;
    let lhs = fold_chain(shape, items)?;
    Ok(Expression::binary(binary, lhs, rhs, op.pos))
}

/// Rule and position of the node being transformed, for shape errors.
struct Shape {
    rule: Rule,
    pos: Pos,
}

impl Shape {
    fn malformed(&self) -> CompileError {
        CompileError::internal(format!("malformed {:?} node", self.rule), self.pos)
    }

    fn single_expr(&self, items: Vec<Item>) -> CompileResult<Expression> {
        match <[Item; 1]>::try_from(items) {
            Ok([Item::Expr(expr)]) => Ok(expr),
            _ => Err(self.malformed()),
        }
    }

    fn base_type(&self, items: Vec<Item>, kind: TypeKind) -> CompileResult<Type> {
        match <[Item; 1]>::try_from(items) {
            Ok([Item::Token(keyword)]) => Ok(Type { kind, pos: keyword.pos }),
            _ => Err(self.malformed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn program(src: &str) -> Program {
        construct(&parser::parse(src).unwrap()).unwrap()
    }

    fn returned(src: &str) -> Expression {
        let program = program(&format!("fvnc dec start() %s ret {src} $ !s"));
        match &program.functions[0].body.statements[0].kind {
            StmtKind::Return(Some(expr)) => expr.clone(),
            other => panic!("expected return, got {other:?}"),
        }
    }

    fn ident(name: &str) -> ExprKind {
        ExprKind::Identifier(Ident { name: name.into(), pos: Pos::default() })
    }

    /// Structural rendering that ignores positions.
    fn render(expr: &Expression) -> String {
        match &expr.kind {
            ExprKind::DecimalLiteral(v) => v.to_string(),
            ExprKind::StringLiteral(s) => format!("{s:?}"),
            ExprKind::BooleanLiteral(b) => b.to_string(),
            ExprKind::Identifier(name) => name.name.clone(),
            ExprKind::AddressOf(name) => format!("&{}", name.name),
            ExprKind::Deref(inner) => format!("*{}", render(inner)),
            ExprKind::Exec { callee, args } => {
                let args = args.iter().map(render).collect::<Vec<_>>();
                format!("{}({})", callee.name, args.join(", "))
            }
            ExprKind::Rev(inner) => format!("!{}", render(inner)),
            ExprKind::Binary { op, lhs, rhs } => {
                format!("({} {op:?} {})", render(lhs), render(rhs))
            }
        }
    }

    #[test]
    fn additive_chain_is_left_associative() {
        assert_eq!(render(&returned("x s y a z")), "((x Sub y) Add z)");
    }

    #[test]
    fn multiplicative_binds_tighter_than_additive() {
        assert_eq!(render(&returned("~~2~~ a ~~3~~ t ~~4~~")), "(2 Add (3 Mul 4))");
        assert_eq!(render(&returned("x d y %% z t w")), "(((x Div y) Mod z) Mul w)");
    }

    #[test]
    fn logical_and_comparison_levels_nest() {
        assert_eq!(
            render(&returned("x 1t y @@ y gte z @r rev p eq q")),
            "(((x LessThan y) And (y GreaterThanEqual z)) Or (!p Equals q))"
        );
    }

    #[test]
    fn binary_nodes_sit_at_their_operator() {
        let expr = returned("x a y");
        assert_eq!(expr.pos, Pos::new(1, 27));
    }

    #[test]
    fn negation_becomes_subtraction_from_zero() {
        let expr = returned("neg x");
        assert_eq!(render(&expr), "(0 Sub x)");
        let ExprKind::Binary { lhs, .. } = &expr.kind else { panic!() };
        assert_eq!(lhs.pos, expr.pos);
        assert_eq!(expr.pos, Pos::new(1, 29));
    }

    #[test]
    fn literals_are_decoded() {
        assert_eq!(returned("~~4d~~").kind, ExprKind::DecimalLiteral(49));
        assert_eq!(returned("trve").kind, ExprKind::BooleanLiteral(true));
        assert_eq!(returned("fa1se").kind, ExprKind::BooleanLiteral(false));
        assert_eq!(
            returned(r"`a\tb\nc\\d\q`").kind,
            ExprKind::StringLiteral("a\tb\nc\\d\\q".into())
        );
    }

    #[test]
    fn bad_literal_is_a_positioned_decode_error() {
        let tree = parser::parse("fvnc dec start() %s ret ~~1~~ a ~~~~ $ !s").unwrap();
        let err = construct(&tree).unwrap_err();
        assert!(matches!(err, CompileError::Decode { pos, .. } if pos == Pos::new(1, 33)));
    }

    #[test]
    fn pointer_forms() {
        assert_eq!(render(&returned("#(addr x a ~~1~~)")), "*(&x Add 1)");
        assert_eq!(render(&returned("f(x, ~~2~~)")), "f(x, 2)");
        assert_eq!(returned("x").kind, ident("x"));
    }

    #[test]
    fn types_wrap_pointers_outward() {
        let program = program("fvnc v@1d f(char## p, str s) %s n@p $ !s");
        let params = &program.functions[0].params;
        let TypeKind::PointerOf(inner) = &params[0].ty.kind else { panic!() };
        let TypeKind::PointerOf(inner) = &inner.kind else { panic!() };
        assert_eq!(inner.kind, TypeKind::Char);
        assert_eq!(params[1].ty.kind, TypeKind::StrPtr);
    }

    #[test]
    fn statements_keep_their_shape() {
        let src = "fvnc v@1d f(dec x) %s
            dec y $
            y = x $
            #addr y = ~~1~~ $
            if x eq ~~1~~ %s ret $ !s e1if x eq ~~2~~ %s n@p $ !s e1se %s n@p $ !s
            as x gt ~~@~~ %s x = x s ~~1~~ $ !s
            wr1ted(y) $
        !s";
        let program = program(src);
        let stmts = &program.functions[0].body.statements;
        assert!(matches!(stmts[0].kind, StmtKind::VarDecl { .. }));
        assert!(matches!(
            &stmts[1].kind,
            StmtKind::VarAss { target: AssignTarget::Name(n), .. } if n.name == "y"
        ));
        assert!(matches!(
            &stmts[2].kind,
            StmtKind::VarAss { target: AssignTarget::Deref { .. }, .. }
        ));
        let StmtKind::If(if_stmt) = &stmts[3].kind else { panic!() };
        assert_eq!(if_stmt.else_ifs.len(), 1);
        assert!(if_stmt.else_body.is_some());
        assert_eq!(if_stmt.body.statements[0].kind, StmtKind::Return(None));
        assert!(matches!(stmts[4].kind, StmtKind::As { .. }));
        assert!(matches!(stmts[5].kind, StmtKind::Expression(_)));
        assert_eq!(stmts[0].pos, Pos::new(2, 13));
    }

    #[test]
    fn unknown_operator_symbol_is_an_internal_error() {
        let operand = |text: &str| {
            Node::Tree(Tree::new(
                Rule::IdentifierExpr,
                vec![Token::new(TokenKind::Identifier, text, Pos::default()).into()],
                Pos::default(),
            ))
        };
        let chain = Tree::new(
            Rule::Formula,
            vec![
                operand("x"),
                Token::new(TokenKind::Operator, "t", Pos::new(1, 3)).into(),
                operand("y"),
            ],
            Pos::default(),
        );
        let err = transform(&chain).unwrap_err();
        assert!(matches!(err, CompileError::Internal { .. }));
        assert!(err.to_string().contains("unrecognized operator `t`"));
    }
}
