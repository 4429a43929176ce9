use crate::lexer::{Token, TokenKind, TokenStream};
use crate::translator::TypeTable;

use super::{Expr, Stmt};

/// A top-level declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Var(VarDecl),
    Array(ArrayDecl),
    Func(FuncDecl),
}

/// `type "*"? ident ("=" expr)? ";"`, also usable as a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub type_id: usize,
    pub identifier: String,
    pub is_pointer: bool,
    pub value: Option<Expr>,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayDecl {
    /// `type ident "[" expr "]" ";"`
    Simple(SimpleArrayDecl),
    /// `type ident "[" "]" "=" "{" init_list "}" ";"`
    InitList(InitListArrayDecl),
    /// `type ident "[" "]" "=" str_lit ";"`
    Str(StrArrayDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimpleArrayDecl {
    pub type_id: usize,
    pub identifier: String,
    pub size: Expr,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitListArrayDecl {
    pub type_id: usize,
    pub identifier: String,
    pub values: Vec<Expr>,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrArrayDecl {
    pub type_id: usize,
    pub identifier: String,
    pub literal: String,
    pub tokens: Vec<Token>,
}

/// A function prototype (`body == None`) or definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub type_id: usize,
    pub identifier: String,
    pub params: Vec<ParamDecl>,
    pub body: Option<Stmt>,
    pub tokens: Vec<Token>,
}

/// `type "*"? ident`
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub type_id: usize,
    pub identifier: String,
    pub is_pointer: bool,
    pub tokens: Vec<Token>,
}

impl Decl {
    pub fn position(&self) -> (usize, usize) {
        match self {
            Decl::Var(d) => d.position(),
            Decl::Array(d) => d.position(),
            Decl::Func(d) => d.tokens.first().map(Token::position).unwrap_or((0, 0)),
        }
    }

    pub fn undo(self, stream: &mut TokenStream) {
        match self {
            Decl::Var(d) => d.undo(stream),
            Decl::Array(d) => d.undo(stream),
            Decl::Func(d) => d.undo(stream),
        }
    }

    pub fn ast_string(&self, types: &TypeTable) -> String {
        match self {
            Decl::Var(d) => d.ast_string(types),
            Decl::Array(d) => d.ast_string(types),
            Decl::Func(d) => d.ast_string(types),
        }
    }
}

impl VarDecl {
    pub fn position(&self) -> (usize, usize) {
        self.tokens.first().map(Token::position).unwrap_or((0, 0))
    }

    pub fn undo(mut self, stream: &mut TokenStream) {
        if matches!(
            self.tokens.last().map(|t| &t.kind),
            Some(TokenKind::Semicolon)
        ) {
            stream.put_back(self.tokens.pop().unwrap());
        }

        if let Some(value) = self.value.take() {
            value.undo(stream);
            stream.put_back(self.tokens.pop().unwrap()); // '='
        }

        stream.put_back(self.tokens.pop().unwrap()); // identifier
        if matches!(self.tokens.last().map(|t| &t.kind), Some(TokenKind::Star)) {
            stream.put_back(self.tokens.pop().unwrap());
        }
        stream.put_back(self.tokens.pop().unwrap()); // type
    }

    pub fn ast_string(&self, types: &TypeTable) -> String {
        let star = if self.is_pointer { "*" } else { "" };
        let value = match &self.value {
            Some(value) => format!("{{ {} }}", value.ast_string()),
            None => String::new(),
        };
        format!(
            "(var_decl)[ {} {}{} ]{}",
            types.name_of(self.type_id),
            star,
            self.identifier,
            value
        )
    }
}

impl ArrayDecl {
    pub fn identifier(&self) -> &str {
        match self {
            ArrayDecl::Simple(d) => &d.identifier,
            ArrayDecl::InitList(d) => &d.identifier,
            ArrayDecl::Str(d) => &d.identifier,
        }
    }

    pub fn position(&self) -> (usize, usize) {
        let tokens = match self {
            ArrayDecl::Simple(d) => &d.tokens,
            ArrayDecl::InitList(d) => &d.tokens,
            ArrayDecl::Str(d) => &d.tokens,
        };
        tokens.first().map(Token::position).unwrap_or((0, 0))
    }

    pub fn undo(self, stream: &mut TokenStream) {
        match self {
            ArrayDecl::Simple(mut d) => {
                stream.put_back(d.tokens.pop().unwrap()); // ';'
                stream.put_back(d.tokens.pop().unwrap()); // ']'
                d.size.undo(stream);
                stream.put_back(d.tokens.pop().unwrap()); // '['
                stream.put_back(d.tokens.pop().unwrap()); // identifier
                stream.put_back(d.tokens.pop().unwrap()); // type
            }
            ArrayDecl::InitList(mut d) => {
                stream.put_back(d.tokens.pop().unwrap()); // ';'
                stream.put_back(d.tokens.pop().unwrap()); // '}'
                for value in d.values.into_iter().rev() {
                    value.undo(stream);
                }
                stream.put_back(d.tokens.pop().unwrap()); // '{'
                stream.put_back(d.tokens.pop().unwrap()); // '='
                stream.put_back(d.tokens.pop().unwrap()); // ']'
                stream.put_back(d.tokens.pop().unwrap()); // '['
                stream.put_back(d.tokens.pop().unwrap()); // identifier
                stream.put_back(d.tokens.pop().unwrap()); // type
            }
            ArrayDecl::Str(mut d) => {
                while let Some(token) = d.tokens.pop() {
                    stream.put_back(token);
                }
            }
        }
    }

    pub fn ast_string(&self, types: &TypeTable) -> String {
        match self {
            ArrayDecl::Simple(d) => format!(
                "(array_decl)[ {} {} ]{{ {} }}",
                types.name_of(d.type_id),
                d.identifier,
                d.size.ast_string()
            ),
            ArrayDecl::InitList(d) => {
                let values = d
                    .values
                    .iter()
                    .map(Expr::ast_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                format!(
                    "(array_decl)[ {} {} ]{{ {} }}",
                    types.name_of(d.type_id),
                    d.identifier,
                    values
                )
            }
            ArrayDecl::Str(d) => format!(
                "(array_decl)[ {} {} ]{{ \"{}\" }}",
                types.name_of(d.type_id),
                d.identifier,
                d.literal
            ),
        }
    }
}

impl FuncDecl {
    pub fn position(&self) -> (usize, usize) {
        self.tokens.first().map(Token::position).unwrap_or((0, 0))
    }

    pub fn undo(mut self, stream: &mut TokenStream) {
        match self.body.take() {
            Some(body) => body.undo(stream),
            None => stream.put_back(self.tokens.pop().unwrap()), // ';'
        }

        stream.put_back(self.tokens.pop().unwrap()); // ')'
        for param in self.params.into_iter().rev() {
            param.undo(stream);
        }
        stream.put_back(self.tokens.pop().unwrap()); // '('
        stream.put_back(self.tokens.pop().unwrap()); // identifier
        stream.put_back(self.tokens.pop().unwrap()); // type
    }

    pub fn ast_string(&self, types: &TypeTable) -> String {
        let params = if self.params.is_empty() {
            String::new()
        } else {
            format!(
                " params: {}",
                self.params
                    .iter()
                    .map(|p| p.ast_string(types))
                    .collect::<Vec<_>>()
                    .join(" ")
            )
        };
        let body = match &self.body {
            Some(body) => body.ast_string(types),
            None => String::new(),
        };
        format!(
            "(function)[type: {} id: {}{}]{{{}}}",
            types.name_of(self.type_id),
            self.identifier,
            params,
            body
        )
    }
}

impl ParamDecl {
    pub fn undo(mut self, stream: &mut TokenStream) {
        stream.put_back(self.tokens.pop().unwrap()); // identifier
        if matches!(self.tokens.last().map(|t| &t.kind), Some(TokenKind::Star)) {
            stream.put_back(self.tokens.pop().unwrap());
        }
        stream.put_back(self.tokens.pop().unwrap()); // type
    }

    pub fn ast_string(&self, types: &TypeTable) -> String {
        let star = if self.is_pointer { "*" } else { "" };
        format!("{} {}{}", types.name_of(self.type_id), star, self.identifier)
    }
}
