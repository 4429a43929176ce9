use crate::lexer::{Token, TokenStream};
use crate::translator::TypeTable;

use super::{ArrayDecl, Expr, Term, VarDecl};

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Block(BlockStmt),
    If(IfStmt),
    While(WhileStmt),
    Asm(AsmStmt),
    VarDecl(VarDecl),
    ArrayDecl(ArrayDecl),
    Assign(AssignStmt),
    DerefAssign(DerefAssignStmt),
    IndexedAssign(IndexedAssignStmt),
    Return(ReturnStmt),
    Expr(ExprStmt),
}

/// `"{" stmts "}"`
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStmt {
    pub statements: Vec<Stmt>,
    pub tokens: Vec<Token>,
}

/// `"if" "(" expr ")" stmt ("else" stmt)?`
#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub cond: Expr,
    pub actions: Box<Stmt>,
    pub else_actions: Option<Box<Stmt>>,
    pub tokens: Vec<Token>,
}

/// `"while" "(" expr ")" stmt`
#[derive(Debug, Clone, PartialEq)]
pub struct WhileStmt {
    pub cond: Expr,
    pub actions: Box<Stmt>,
    pub tokens: Vec<Token>,
}

/// `"asm" "(" str_lit asm_params ")" ";"`; params are identifier or
/// literal terms referenced positionally from the template.
#[derive(Debug, Clone, PartialEq)]
pub struct AsmStmt {
    pub template: String,
    pub params: Vec<Term>,
    pub tokens: Vec<Token>,
}

/// `ident "=" expr ";"`
#[derive(Debug, Clone, PartialEq)]
pub struct AssignStmt {
    pub identifier: String,
    pub rvalue: Expr,
    pub tokens: Vec<Token>,
}

/// `"*" ident "=" expr ";"`
#[derive(Debug, Clone, PartialEq)]
pub struct DerefAssignStmt {
    pub identifier: String,
    pub rvalue: Expr,
    pub tokens: Vec<Token>,
}

/// `ident "[" expr "]" "=" expr ";"`
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedAssignStmt {
    pub identifier: String,
    pub index: Expr,
    pub rvalue: Expr,
    pub tokens: Vec<Token>,
}

/// `"return" expr ";"`
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStmt {
    pub return_value: Expr,
    pub tokens: Vec<Token>,
}

/// `expr ";"`
#[derive(Debug, Clone, PartialEq)]
pub struct ExprStmt {
    pub expr: Expr,
    pub tokens: Vec<Token>,
}

impl Stmt {
    pub fn position(&self) -> (usize, usize) {
        match self {
            Stmt::Block(s) => s.tokens.first().map(Token::position).unwrap_or((0, 0)),
            Stmt::If(s) => s.tokens.first().map(Token::position).unwrap_or((0, 0)),
            Stmt::While(s) => s.tokens.first().map(Token::position).unwrap_or((0, 0)),
            Stmt::Asm(s) => s.tokens.first().map(Token::position).unwrap_or((0, 0)),
            Stmt::VarDecl(s) => s.position(),
            Stmt::ArrayDecl(s) => s.position(),
            Stmt::Assign(s) => s.tokens.first().map(Token::position).unwrap_or((0, 0)),
            Stmt::DerefAssign(s) => s.tokens.first().map(Token::position).unwrap_or((0, 0)),
            Stmt::IndexedAssign(s) => s.tokens.first().map(Token::position).unwrap_or((0, 0)),
            Stmt::Return(s) => s.tokens.first().map(Token::position).unwrap_or((0, 0)),
            Stmt::Expr(s) => s.tokens.first().map(Token::position).unwrap_or((0, 0)),
        }
    }

    pub fn undo(self, stream: &mut TokenStream) {
        match self {
            Stmt::Block(mut s) => {
                stream.put_back(s.tokens.pop().unwrap()); // '}'
                for statement in s.statements.into_iter().rev() {
                    statement.undo(stream);
                }
                stream.put_back(s.tokens.pop().unwrap()); // '{'
            }
            Stmt::If(mut s) => {
                if let Some(else_actions) = s.else_actions.take() {
                    else_actions.undo(stream);
                    stream.put_back(s.tokens.pop().unwrap()); // 'else'
                }
                s.actions.undo(stream);
                stream.put_back(s.tokens.pop().unwrap()); // ')'
                s.cond.undo(stream);
                stream.put_back(s.tokens.pop().unwrap()); // '('
                stream.put_back(s.tokens.pop().unwrap()); // 'if'
            }
            Stmt::While(mut s) => {
                s.actions.undo(stream);
                stream.put_back(s.tokens.pop().unwrap()); // ')'
                s.cond.undo(stream);
                stream.put_back(s.tokens.pop().unwrap()); // '('
                stream.put_back(s.tokens.pop().unwrap()); // 'while'
            }
            Stmt::Asm(mut s) => {
                stream.put_back(s.tokens.pop().unwrap()); // ';'
                stream.put_back(s.tokens.pop().unwrap()); // ')'
                for param in s.params.into_iter().rev() {
                    param.undo(stream);
                }
                stream.put_back(s.tokens.pop().unwrap()); // string literal
                stream.put_back(s.tokens.pop().unwrap()); // '('
                stream.put_back(s.tokens.pop().unwrap()); // 'asm'
            }
            Stmt::VarDecl(s) => s.undo(stream),
            Stmt::ArrayDecl(s) => s.undo(stream),
            Stmt::Assign(mut s) => {
                stream.put_back(s.tokens.pop().unwrap()); // ';'
                s.rvalue.undo(stream);
                stream.put_back(s.tokens.pop().unwrap()); // '='
                stream.put_back(s.tokens.pop().unwrap()); // identifier
            }
            Stmt::DerefAssign(mut s) => {
                stream.put_back(s.tokens.pop().unwrap()); // ';'
                s.rvalue.undo(stream);
                stream.put_back(s.tokens.pop().unwrap()); // '='
                stream.put_back(s.tokens.pop().unwrap()); // identifier
                stream.put_back(s.tokens.pop().unwrap()); // '*'
            }
            Stmt::IndexedAssign(mut s) => {
                stream.put_back(s.tokens.pop().unwrap()); // ';'
                s.rvalue.undo(stream);
                stream.put_back(s.tokens.pop().unwrap()); // '='
                stream.put_back(s.tokens.pop().unwrap()); // ']'
                s.index.undo(stream);
                stream.put_back(s.tokens.pop().unwrap()); // '['
                stream.put_back(s.tokens.pop().unwrap()); // identifier
            }
            Stmt::Return(mut s) => {
                stream.put_back(s.tokens.pop().unwrap()); // ';'
                s.return_value.undo(stream);
                stream.put_back(s.tokens.pop().unwrap()); // 'return'
            }
            Stmt::Expr(mut s) => {
                stream.put_back(s.tokens.pop().unwrap()); // ';'
                s.expr.undo(stream);
            }
        }
    }

    pub fn ast_string(&self, types: &TypeTable) -> String {
        match self {
            Stmt::Block(s) => {
                let inner = s
                    .statements
                    .iter()
                    .map(|statement| statement.ast_string(types))
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("{{ {inner} }}")
            }
            Stmt::If(s) => {
                let else_part = match &s.else_actions {
                    Some(else_actions) => format!("else{{ {} }}", else_actions.ast_string(types)),
                    None => String::new(),
                };
                format!(
                    "(if)[ cond{{ {} }} ]{{ {} }}{}",
                    s.cond.ast_string(),
                    s.actions.ast_string(types),
                    else_part
                )
            }
            Stmt::While(s) => format!(
                "(while)[ cond{{ {} }} ]{{ {} }}",
                s.cond.ast_string(),
                s.actions.ast_string(types)
            ),
            Stmt::Asm(s) => format!("(asm)[ \"{}\" ]", s.template),
            Stmt::VarDecl(s) => s.ast_string(types),
            Stmt::ArrayDecl(s) => s.ast_string(types),
            Stmt::Assign(s) => format!(
                "(assign)[ {} value( {} )]",
                s.identifier,
                s.rvalue.ast_string()
            ),
            Stmt::DerefAssign(s) => format!(
                "(deref_assign)[ {} value( {} )]",
                s.identifier,
                s.rvalue.ast_string()
            ),
            Stmt::IndexedAssign(s) => format!(
                "(indexed_assign)[ {} index( {} ) value( {} )]",
                s.identifier,
                s.index.ast_string(),
                s.rvalue.ast_string()
            ),
            Stmt::Return(s) => format!("(return)[ {} ]", s.return_value.ast_string()),
            Stmt::Expr(s) => format!("(expr)[ {} ]", s.expr.ast_string()),
        }
    }
}
