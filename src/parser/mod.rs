use std::{error::Error, fmt::Display};

use colored::Colorize;

use crate::ast::*;
use crate::lexer::{Lexer, Token, TokenKind, TokenStream};
use crate::translator::TypeTable;

/// A committed parse failure: a production matched far enough to be
/// unambiguous but could not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}:{}{}  {}",
            "--- Syntax Error".red(),
            self.line,
            self.col,
            ":".red(),
            self.message
        )
    }
}

impl Error for SyntaxError {}

/// `Ok(None)` is a backtrackable mismatch with the token stream restored to
/// its state on entry; `Err` is a committed failure that does not restore.
type MatchResult<T> = Result<Option<T>, SyntaxError>;

/// Recursive-descent matcher over the push-back token stream. One matching
/// routine per grammar production.
pub struct Parser {
    tokens: TokenStream,
    types: TypeTable,
}

impl Parser {
    pub fn new(stream: TokenStream) -> Self {
        Self {
            tokens: stream,
            types: TypeTable::new(),
        }
    }

    pub fn from_lexer(lexer: Lexer) -> Self {
        Self::new(TokenStream::new(lexer))
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    /// program ::= decls
    pub fn parse(&mut self) -> Result<Program, SyntaxError> {
        let mut decls = vec![];
        while self.tokens.peek().kind != TokenKind::Eof {
            decls.push(self.match_decl()?);
        }
        Ok(Program { decls })
    }

    fn unexpected(&mut self, what: &str) -> SyntaxError {
        let token = self.tokens.peek();
        SyntaxError {
            message: format!("{what}. Unexpected {} token", token.name()),
            line: token.line,
            col: token.col,
        }
    }

    /// The type id named by an identifier token, if any.
    fn type_of(&self, token: &Token) -> Option<usize> {
        token.kind.ident().and_then(|name| self.types.id_of(name))
    }

    // ------------------------ declarations ------------------------

    /// decl ::= var_decl | array_decl | func_decl
    fn match_decl(&mut self) -> Result<Decl, SyntaxError> {
        if let Some(d) = self.match_decl_var()? {
            return Ok(Decl::Var(d));
        }
        if let Some(d) = self.match_decl_array()? {
            return Ok(Decl::Array(d));
        }
        if let Some(d) = self.match_decl_func()? {
            return Ok(Decl::Func(d));
        }
        Err(self.unexpected("Could not match declaration"))
    }

    /// var_decl ::= type "*"? ident ("=" expr)? ";"
    fn match_decl_var(&mut self) -> MatchResult<VarDecl> {
        let Some(mut decl) = self.match_decl_var_init()? else {
            return Ok(None);
        };

        let semi = self.tokens.next();
        if semi.kind != TokenKind::Semicolon {
            self.tokens.put_back(semi);
            decl.undo(&mut self.tokens);
            return Ok(None);
        }

        decl.tokens.push(semi);
        Ok(Some(decl))
    }

    /// The `type "*"? ident` prefix shared by both variable declaration
    /// forms.
    fn match_decl_var_prefix(&mut self) -> Option<VarDecl> {
        let type_token = self.tokens.next();
        let Some(type_id) = self.type_of(&type_token) else {
            self.tokens.put_back(type_token);
            return None;
        };

        let star_token = self.tokens.next();
        let star_token = if star_token.kind == TokenKind::Star {
            Some(star_token)
        } else {
            self.tokens.put_back(star_token);
            None
        };

        let id_token = self.tokens.next();
        let Some(identifier) = id_token.kind.ident().map(str::to_owned) else {
            self.tokens.put_back(id_token);
            if let Some(star) = star_token {
                self.tokens.put_back(star);
            }
            self.tokens.put_back(type_token);
            return None;
        };

        let is_pointer = star_token.is_some();
        let mut tokens = vec![type_token];
        if let Some(star) = star_token {
            tokens.push(star);
        }
        tokens.push(id_token);

        Some(VarDecl {
            type_id,
            identifier,
            is_pointer,
            value: None,
            tokens,
        })
    }

    /// The declaration with an optional initialiser; the prefix production
    /// is attempted first and extended if an `=` follows.
    fn match_decl_var_init(&mut self) -> MatchResult<VarDecl> {
        let Some(mut decl) = self.match_decl_var_prefix() else {
            return Ok(None);
        };

        let equals = self.tokens.next();
        if equals.kind != TokenKind::Assign {
            self.tokens.put_back(equals);
            return Ok(Some(decl));
        }

        // The prefix plus `=` is unambiguous, so a failing initialiser is a
        // committed syntax error.
        let value = self.match_expr()?;

        decl.tokens.push(equals);
        decl.value = Some(rewrite(value));
        Ok(Some(decl))
    }

    /// array_decl with its three alternatives, longest first.
    fn match_decl_array(&mut self) -> MatchResult<ArrayDecl> {
        if let Some(d) = self.match_decl_array_simple()? {
            return Ok(Some(ArrayDecl::Simple(d)));
        }
        if let Some(d) = self.match_decl_array_init_list()? {
            return Ok(Some(ArrayDecl::InitList(d)));
        }
        if let Some(d) = self.match_decl_array_str() {
            return Ok(Some(ArrayDecl::Str(d)));
        }
        Ok(None)
    }

    /// array_decl ::= type ident "[" expr "]" ";"
    fn match_decl_array_simple(&mut self) -> MatchResult<SimpleArrayDecl> {
        let type_token = self.tokens.next();
        let identifier_token = self.tokens.next();
        let open_bracket = self.tokens.next();

        let type_id = self.type_of(&type_token);
        let identifier = identifier_token.kind.ident().map(str::to_owned);
        let (Some(type_id), Some(identifier), TokenKind::OpenBracket) =
            (type_id, identifier, &open_bracket.kind)
        else {
            self.tokens.put_back(open_bracket);
            self.tokens.put_back(identifier_token);
            self.tokens.put_back(type_token);
            return Ok(None);
        };

        let size = match self.match_expr() {
            Ok(size) => size,
            Err(_) => {
                self.tokens.put_back(open_bracket);
                self.tokens.put_back(identifier_token);
                self.tokens.put_back(type_token);
                return Ok(None);
            }
        };

        let closed_bracket = self.tokens.next();
        let semi = self.tokens.next();
        if closed_bracket.kind != TokenKind::ClosedBracket || semi.kind != TokenKind::Semicolon {
            self.tokens.put_back(semi);
            self.tokens.put_back(closed_bracket);
            size.undo(&mut self.tokens);
            self.tokens.put_back(open_bracket);
            self.tokens.put_back(identifier_token);
            self.tokens.put_back(type_token);
            return Ok(None);
        }

        Ok(Some(SimpleArrayDecl {
            type_id,
            identifier,
            size: rewrite(size),
            tokens: vec![
                type_token,
                identifier_token,
                open_bracket,
                closed_bracket,
                semi,
            ],
        }))
    }

    /// array_decl ::= type ident "[" "]" "=" "{" init_list "}" ";"
    fn match_decl_array_init_list(&mut self) -> MatchResult<InitListArrayDecl> {
        let type_token = self.tokens.next();
        let identifier_token = self.tokens.next();
        let open_bracket = self.tokens.next();
        let closed_bracket = self.tokens.next();
        let assignment = self.tokens.next();
        let open_brace = self.tokens.next();

        let type_id = self.type_of(&type_token);
        let identifier = identifier_token.kind.ident().map(str::to_owned);
        let shape_matches = open_bracket.kind == TokenKind::OpenBracket
            && closed_bracket.kind == TokenKind::ClosedBracket
            && assignment.kind == TokenKind::Assign
            && open_brace.kind == TokenKind::OpenBrace;

        let (Some(type_id), Some(identifier), true) = (type_id, identifier, shape_matches) else {
            self.tokens.put_back(open_brace);
            self.tokens.put_back(assignment);
            self.tokens.put_back(closed_bracket);
            self.tokens.put_back(open_bracket);
            self.tokens.put_back(identifier_token);
            self.tokens.put_back(type_token);
            return Ok(None);
        };

        let values = self.match_init_list();
        if values.is_empty() {
            self.tokens.put_back(open_brace);
            self.tokens.put_back(assignment);
            self.tokens.put_back(closed_bracket);
            self.tokens.put_back(open_bracket);
            self.tokens.put_back(identifier_token);
            self.tokens.put_back(type_token);
            return Ok(None);
        }

        let closed_brace = self.tokens.next();
        let semi = self.tokens.next();
        if closed_brace.kind != TokenKind::ClosedBrace || semi.kind != TokenKind::Semicolon {
            self.tokens.put_back(semi);
            self.tokens.put_back(closed_brace);
            for value in values.into_iter().rev() {
                value.undo(&mut self.tokens);
            }
            self.tokens.put_back(open_brace);
            self.tokens.put_back(assignment);
            self.tokens.put_back(closed_bracket);
            self.tokens.put_back(open_bracket);
            self.tokens.put_back(identifier_token);
            self.tokens.put_back(type_token);
            return Ok(None);
        }

        Ok(Some(InitListArrayDecl {
            type_id,
            identifier,
            values,
            tokens: vec![
                type_token,
                identifier_token,
                open_bracket,
                closed_bracket,
                assignment,
                open_brace,
                closed_brace,
                semi,
            ],
        }))
    }

    /// init_list ::= expr init_list | ε
    fn match_init_list(&mut self) -> Vec<Expr> {
        let mut values = vec![];
        loop {
            match self.match_expr() {
                Ok(value) => values.push(rewrite(value)),
                Err(_) => return values,
            }
        }
    }

    /// array_decl ::= type ident "[" "]" "=" str_lit ";"
    fn match_decl_array_str(&mut self) -> Option<StrArrayDecl> {
        let type_token = self.tokens.next();
        let identifier_token = self.tokens.next();
        let open_bracket = self.tokens.next();
        let closed_bracket = self.tokens.next();
        let assignment = self.tokens.next();
        let string_token = self.tokens.next();
        let semi = self.tokens.next();

        let type_id = self.type_of(&type_token);
        let identifier = identifier_token.kind.ident().map(str::to_owned);
        let literal = match &string_token.kind {
            TokenKind::StrLiteral(value) => Some(value.clone()),
            _ => None,
        };
        let shape_matches = open_bracket.kind == TokenKind::OpenBracket
            && closed_bracket.kind == TokenKind::ClosedBracket
            && assignment.kind == TokenKind::Assign
            && semi.kind == TokenKind::Semicolon;

        let (Some(type_id), Some(identifier), Some(literal), true) =
            (type_id, identifier, literal, shape_matches)
        else {
            self.tokens.put_back(semi);
            self.tokens.put_back(string_token);
            self.tokens.put_back(assignment);
            self.tokens.put_back(closed_bracket);
            self.tokens.put_back(open_bracket);
            self.tokens.put_back(identifier_token);
            self.tokens.put_back(type_token);
            return None;
        };

        Some(StrArrayDecl {
            type_id,
            identifier,
            literal,
            tokens: vec![
                type_token,
                identifier_token,
                open_bracket,
                closed_bracket,
                assignment,
                string_token,
                semi,
            ],
        })
    }

    /// func_decl with its two alternatives: prototype first, then
    /// definition.
    fn match_decl_func(&mut self) -> MatchResult<FuncDecl> {
        if let Some(d) = self.match_decl_func_proto()? {
            return Ok(Some(d));
        }
        self.match_decl_func_def()
    }

    /// The `type ident "("` prefix shared by both function forms, plus the
    /// parameter declarations.
    fn match_func_head(&mut self) -> Option<(Token, Token, Token, usize, String, Vec<ParamDecl>)> {
        let type_token = self.tokens.next();
        let Some(type_id) = self.type_of(&type_token) else {
            self.tokens.put_back(type_token);
            return None;
        };

        let id_token = self.tokens.next();
        let Some(identifier) = id_token.kind.ident().map(str::to_owned) else {
            self.tokens.put_back(id_token);
            self.tokens.put_back(type_token);
            return None;
        };

        let open_paren = self.tokens.next();
        if open_paren.kind != TokenKind::OpenParen {
            self.tokens.put_back(open_paren);
            self.tokens.put_back(id_token);
            self.tokens.put_back(type_token);
            return None;
        }

        let params = self.match_param_decls();
        Some((type_token, id_token, open_paren, type_id, identifier, params))
    }

    fn undo_func_head(
        &mut self,
        type_token: Token,
        id_token: Token,
        open_paren: Token,
        params: Vec<ParamDecl>,
    ) {
        for param in params.into_iter().rev() {
            param.undo(&mut self.tokens);
        }
        self.tokens.put_back(open_paren);
        self.tokens.put_back(id_token);
        self.tokens.put_back(type_token);
    }

    /// func_decl ::= type ident "(" param_decls? ")" ";"
    fn match_decl_func_proto(&mut self) -> MatchResult<FuncDecl> {
        let Some((type_token, id_token, open_paren, type_id, identifier, params)) =
            self.match_func_head()
        else {
            return Ok(None);
        };

        let closed_paren = self.tokens.next();
        let semi = self.tokens.next();
        if closed_paren.kind != TokenKind::ClosedParen || semi.kind != TokenKind::Semicolon {
            self.tokens.put_back(semi);
            self.tokens.put_back(closed_paren);
            self.undo_func_head(type_token, id_token, open_paren, params);
            return Ok(None);
        }

        Ok(Some(FuncDecl {
            type_id,
            identifier,
            params,
            body: None,
            tokens: vec![type_token, id_token, open_paren, closed_paren, semi],
        }))
    }

    /// func_decl ::= type ident "(" param_decls? ")" block_stmt
    fn match_decl_func_def(&mut self) -> MatchResult<FuncDecl> {
        let Some((type_token, id_token, open_paren, type_id, identifier, params)) =
            self.match_func_head()
        else {
            return Ok(None);
        };

        let closed_paren = self.tokens.next();
        if closed_paren.kind != TokenKind::ClosedParen {
            self.tokens.put_back(closed_paren);
            self.undo_func_head(type_token, id_token, open_paren, params);
            return Ok(None);
        }

        let Some(body) = self.match_stmt_block()? else {
            self.tokens.put_back(closed_paren);
            self.undo_func_head(type_token, id_token, open_paren, params);
            return Ok(None);
        };

        Ok(Some(FuncDecl {
            type_id,
            identifier,
            params,
            body: Some(Stmt::Block(body)),
            tokens: vec![type_token, id_token, open_paren, closed_paren],
        }))
    }

    /// param_decls ::= param_decl param_decls | ε
    fn match_param_decls(&mut self) -> Vec<ParamDecl> {
        let mut params = vec![];
        while let Some(param) = self.match_param_decl() {
            params.push(param);
        }
        params
    }

    /// param_decl ::= type "*"? ident
    fn match_param_decl(&mut self) -> Option<ParamDecl> {
        let decl = self.match_decl_var_prefix()?;
        let VarDecl {
            type_id,
            identifier,
            is_pointer,
            tokens,
            ..
        } = decl;
        Some(ParamDecl {
            type_id,
            identifier,
            is_pointer,
            tokens,
        })
    }

    // ------------------------- statements -------------------------

    /// stmts ::= stmt stmts | ε
    ///
    /// A failure with a closing brace at the front of the stream ends the
    /// list; any other failure is committed.
    fn match_stmts(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut statements = vec![];
        loop {
            match self.match_stmt() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    if self.tokens.peek().kind == TokenKind::ClosedBrace {
                        return Ok(statements);
                    }
                    return Err(e);
                }
            }
        }
    }

    fn match_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        if let Some(s) = self.match_stmt_assign()? {
            return Ok(Stmt::Assign(s));
        }
        if let Some(s) = self.match_stmt_assign_deref()? {
            return Ok(Stmt::DerefAssign(s));
        }
        if let Some(s) = self.match_stmt_assign_indexed()? {
            return Ok(Stmt::IndexedAssign(s));
        }
        if let Some(s) = self.match_decl_var()? {
            return Ok(Stmt::VarDecl(s));
        }
        if let Some(s) = self.match_decl_array()? {
            return Ok(Stmt::ArrayDecl(s));
        }
        if let Some(s) = self.match_stmt_block()? {
            return Ok(Stmt::Block(s));
        }
        if let Some(s) = self.match_stmt_return()? {
            return Ok(Stmt::Return(s));
        }
        if let Some(s) = self.match_stmt_expr()? {
            return Ok(Stmt::Expr(s));
        }
        if let Some(s) = self.match_stmt_if()? {
            return Ok(Stmt::If(s));
        }
        if let Some(s) = self.match_stmt_while()? {
            return Ok(Stmt::While(s));
        }
        if let Some(s) = self.match_stmt_asm()? {
            return Ok(Stmt::Asm(s));
        }
        Err(self.unexpected("Could not match statement"))
    }

    /// block_stmt ::= "{" stmts "}"
    fn match_stmt_block(&mut self) -> MatchResult<BlockStmt> {
        let open_brace = self.tokens.next();
        if open_brace.kind != TokenKind::OpenBrace {
            self.tokens.put_back(open_brace);
            return Ok(None);
        }

        let statements = self.match_stmts()?;

        let closed_brace = self.tokens.next();
        if closed_brace.kind != TokenKind::ClosedBrace {
            self.tokens.put_back(closed_brace);
            for statement in statements.into_iter().rev() {
                statement.undo(&mut self.tokens);
            }
            self.tokens.put_back(open_brace);
            return Ok(None);
        }

        Ok(Some(BlockStmt {
            statements,
            tokens: vec![open_brace, closed_brace],
        }))
    }

    /// stmt ::= "if" "(" expr ")" stmt ("else" stmt)?
    fn match_stmt_if(&mut self) -> MatchResult<IfStmt> {
        let if_token = self.tokens.next();
        let open_paren = self.tokens.next();

        if if_token.kind != TokenKind::If || open_paren.kind != TokenKind::OpenParen {
            self.tokens.put_back(open_paren);
            self.tokens.put_back(if_token);
            return Ok(None);
        }

        let cond = match self.match_expr() {
            Ok(cond) => cond,
            Err(_) => {
                self.tokens.put_back(open_paren);
                self.tokens.put_back(if_token);
                return Err(
                    self.unexpected("Could not match condition expression for if statement")
                );
            }
        };

        let closed_paren = self.tokens.next();
        if closed_paren.kind != TokenKind::ClosedParen {
            self.tokens.put_back(closed_paren);
            cond.undo(&mut self.tokens);
            self.tokens.put_back(open_paren);
            self.tokens.put_back(if_token);
            return Ok(None);
        }

        let actions = self.match_stmt()?;

        let else_token = self.tokens.next();
        let (else_actions, else_token) = if else_token.kind == TokenKind::Else {
            (Some(Box::new(self.match_stmt()?)), Some(else_token))
        } else {
            self.tokens.put_back(else_token);
            (None, None)
        };

        let mut tokens = vec![if_token, open_paren, closed_paren];
        if let Some(else_token) = else_token {
            tokens.push(else_token);
        }

        Ok(Some(IfStmt {
            cond: rewrite(cond),
            actions: Box::new(actions),
            else_actions,
            tokens,
        }))
    }

    /// stmt ::= "while" "(" expr ")" stmt
    fn match_stmt_while(&mut self) -> MatchResult<WhileStmt> {
        let while_token = self.tokens.next();
        let open_paren = self.tokens.next();

        if while_token.kind != TokenKind::While || open_paren.kind != TokenKind::OpenParen {
            self.tokens.put_back(open_paren);
            self.tokens.put_back(while_token);
            return Ok(None);
        }

        let cond = match self.match_expr() {
            Ok(cond) => cond,
            Err(_) => {
                self.tokens.put_back(open_paren);
                self.tokens.put_back(while_token);
                return Err(
                    self.unexpected("Could not match condition expression for while statement")
                );
            }
        };

        let closed_paren = self.tokens.next();
        if closed_paren.kind != TokenKind::ClosedParen {
            self.tokens.put_back(closed_paren);
            cond.undo(&mut self.tokens);
            self.tokens.put_back(open_paren);
            self.tokens.put_back(while_token);
            return Ok(None);
        }

        let actions = self.match_stmt()?;

        Ok(Some(WhileStmt {
            cond: rewrite(cond),
            actions: Box::new(actions),
            tokens: vec![while_token, open_paren, closed_paren],
        }))
    }

    /// stmt ::= "asm" "(" str_lit asm_params ")" ";"
    fn match_stmt_asm(&mut self) -> MatchResult<AsmStmt> {
        let asm_token = self.tokens.next();
        let open_paren = self.tokens.next();
        let string_token = self.tokens.next();

        let template = match &string_token.kind {
            TokenKind::StrLiteral(value) => Some(value.clone()),
            _ => None,
        };
        let shape_matches =
            asm_token.kind == TokenKind::Asm && open_paren.kind == TokenKind::OpenParen;

        let (Some(template), true) = (template, shape_matches) else {
            self.tokens.put_back(string_token);
            self.tokens.put_back(open_paren);
            self.tokens.put_back(asm_token);
            return Ok(None);
        };

        let params = self.match_asm_params();

        let closed_paren = self.tokens.next();
        let semi = self.tokens.next();
        if closed_paren.kind != TokenKind::ClosedParen || semi.kind != TokenKind::Semicolon {
            self.tokens.put_back(semi);
            self.tokens.put_back(closed_paren);
            for param in params.into_iter().rev() {
                param.undo(&mut self.tokens);
            }
            self.tokens.put_back(string_token);
            self.tokens.put_back(open_paren);
            self.tokens.put_back(asm_token);
            return Ok(None);
        }

        Ok(Some(AsmStmt {
            template,
            params,
            tokens: vec![asm_token, open_paren, string_token, closed_paren, semi],
        }))
    }

    /// asm_params ::= asm_param asm_params | ε, where an asm_param is a
    /// literal or an identifier.
    fn match_asm_params(&mut self) -> Vec<Term> {
        let mut params = vec![];
        loop {
            if let Some(lit) = self.match_term_literal() {
                params.push(Term::Lit(lit));
                continue;
            }
            if let Some(id) = self.match_term_identifier() {
                params.push(Term::Id(id));
                continue;
            }
            return params;
        }
    }

    /// stmt ::= "return" expr ";"
    fn match_stmt_return(&mut self) -> MatchResult<ReturnStmt> {
        let return_token = self.tokens.next();
        if return_token.kind != TokenKind::Return {
            self.tokens.put_back(return_token);
            return Ok(None);
        }

        let return_value = match self.match_expr() {
            Ok(value) => value,
            Err(_) => {
                self.tokens.put_back(return_token);
                return Err(self.unexpected("Could not match expression for return statement"));
            }
        };

        let semi = self.tokens.next();
        if semi.kind != TokenKind::Semicolon {
            self.tokens.put_back(semi);
            return_value.undo(&mut self.tokens);
            self.tokens.put_back(return_token);
            return Ok(None);
        }

        Ok(Some(ReturnStmt {
            return_value: rewrite(return_value),
            tokens: vec![return_token, semi],
        }))
    }

    /// stmt ::= expr ";"
    fn match_stmt_expr(&mut self) -> MatchResult<ExprStmt> {
        let expr = match self.match_expr() {
            Ok(expr) => expr,
            Err(_) => return Ok(None),
        };

        let semi = self.tokens.next();
        if semi.kind != TokenKind::Semicolon {
            self.tokens.put_back(semi);
            expr.undo(&mut self.tokens);
            return Ok(None);
        }

        Ok(Some(ExprStmt {
            expr: rewrite(expr),
            tokens: vec![semi],
        }))
    }

    /// stmt ::= ident "=" expr ";"
    fn match_stmt_assign(&mut self) -> MatchResult<AssignStmt> {
        let id_token = self.tokens.next();
        let assign_token = self.tokens.next();

        let identifier = id_token.kind.ident().map(str::to_owned);
        let (Some(identifier), TokenKind::Assign) = (identifier, &assign_token.kind) else {
            self.tokens.put_back(assign_token);
            self.tokens.put_back(id_token);
            return Ok(None);
        };

        let rvalue = match self.match_expr() {
            Ok(rvalue) => rvalue,
            Err(_) => {
                self.tokens.put_back(assign_token);
                self.tokens.put_back(id_token);
                return Ok(None);
            }
        };

        let semi = self.tokens.next();
        if semi.kind != TokenKind::Semicolon {
            self.tokens.put_back(semi);
            rvalue.undo(&mut self.tokens);
            self.tokens.put_back(assign_token);
            self.tokens.put_back(id_token);
            return Ok(None);
        }

        Ok(Some(AssignStmt {
            identifier,
            rvalue: rewrite(rvalue),
            tokens: vec![id_token, assign_token, semi],
        }))
    }

    /// stmt ::= "*" ident "=" expr ";"
    fn match_stmt_assign_deref(&mut self) -> MatchResult<DerefAssignStmt> {
        let star_token = self.tokens.next();
        let id_token = self.tokens.next();
        let assign_token = self.tokens.next();

        let identifier = id_token.kind.ident().map(str::to_owned);
        let shape_matches =
            star_token.kind == TokenKind::Star && assign_token.kind == TokenKind::Assign;

        let (Some(identifier), true) = (identifier, shape_matches) else {
            self.tokens.put_back(assign_token);
            self.tokens.put_back(id_token);
            self.tokens.put_back(star_token);
            return Ok(None);
        };

        let rvalue = match self.match_expr() {
            Ok(rvalue) => rvalue,
            Err(_) => {
                self.tokens.put_back(assign_token);
                self.tokens.put_back(id_token);
                self.tokens.put_back(star_token);
                return Ok(None);
            }
        };

        let semi = self.tokens.next();
        if semi.kind != TokenKind::Semicolon {
            self.tokens.put_back(semi);
            rvalue.undo(&mut self.tokens);
            self.tokens.put_back(assign_token);
            self.tokens.put_back(id_token);
            self.tokens.put_back(star_token);
            return Ok(None);
        }

        Ok(Some(DerefAssignStmt {
            identifier,
            rvalue: rewrite(rvalue),
            tokens: vec![star_token, id_token, assign_token, semi],
        }))
    }

    /// stmt ::= ident "[" expr "]" "=" expr ";"
    fn match_stmt_assign_indexed(&mut self) -> MatchResult<IndexedAssignStmt> {
        let id_token = self.tokens.next();
        let open_bracket = self.tokens.next();

        let identifier = id_token.kind.ident().map(str::to_owned);
        let (Some(identifier), TokenKind::OpenBracket) = (identifier, &open_bracket.kind) else {
            self.tokens.put_back(open_bracket);
            self.tokens.put_back(id_token);
            return Ok(None);
        };

        let index = match self.match_expr() {
            Ok(index) => index,
            Err(_) => {
                self.tokens.put_back(open_bracket);
                self.tokens.put_back(id_token);
                return Ok(None);
            }
        };

        let closed_bracket = self.tokens.next();
        let assign_token = self.tokens.next();
        if closed_bracket.kind != TokenKind::ClosedBracket
            || assign_token.kind != TokenKind::Assign
        {
            self.tokens.put_back(assign_token);
            self.tokens.put_back(closed_bracket);
            index.undo(&mut self.tokens);
            self.tokens.put_back(open_bracket);
            self.tokens.put_back(id_token);
            return Ok(None);
        }

        let rvalue = match self.match_expr() {
            Ok(rvalue) => rvalue,
            Err(_) => {
                self.tokens.put_back(assign_token);
                self.tokens.put_back(closed_bracket);
                index.undo(&mut self.tokens);
                self.tokens.put_back(open_bracket);
                self.tokens.put_back(id_token);
                return Ok(None);
            }
        };

        let semi = self.tokens.next();
        if semi.kind != TokenKind::Semicolon {
            self.tokens.put_back(semi);
            rvalue.undo(&mut self.tokens);
            self.tokens.put_back(assign_token);
            self.tokens.put_back(closed_bracket);
            index.undo(&mut self.tokens);
            self.tokens.put_back(open_bracket);
            self.tokens.put_back(id_token);
            return Ok(None);
        }

        Ok(Some(IndexedAssignStmt {
            identifier,
            index: rewrite(index),
            rvalue: rewrite(rvalue),
            tokens: vec![id_token, open_bracket, closed_bracket, assign_token, semi],
        }))
    }

    // ------------------------ expressions -------------------------

    /// expr ::= term binop expr | "-" term | "!" term | term
    fn match_expr(&mut self) -> Result<Expr, SyntaxError> {
        if let Some(e) = self.match_expr_binop()? {
            return Ok(Expr::Binop(e));
        }
        if let Some(t) = self.match_term()? {
            return Ok(Expr::Term(t));
        }
        if let Some(e) = self.match_expr_negated()? {
            return Ok(Expr::Neg(e));
        }
        if let Some(e) = self.match_expr_not()? {
            return Ok(Expr::Not(e));
        }
        Err(self.unexpected("Could not match expression"))
    }

    /// expr ::= term binop expr, naturally right-associated; rewritten at
    /// the production that finally accepts the expression.
    fn match_expr_binop(&mut self) -> MatchResult<BinopExpr> {
        let Some(left) = self.match_term()? else {
            return Ok(None);
        };

        let Some((op, op_token)) = self.match_binop() else {
            left.undo(&mut self.tokens);
            return Ok(None);
        };

        let rest = self.match_expr()?;

        Ok(Some(BinopExpr {
            op,
            term: Box::new(Expr::Term(left)),
            rest: Box::new(rest),
            left_assoc: false,
            tokens: vec![op_token],
        }))
    }

    fn match_binop(&mut self) -> Option<(BinopKind, Token)> {
        let op_token = self.tokens.next();
        let op = match op_token.kind {
            TokenKind::Plus => BinopKind::Add,
            TokenKind::Minus => BinopKind::Sub,
            TokenKind::Ampersand => BinopKind::And,
            TokenKind::Pipe => BinopKind::Or,
            TokenKind::Star => BinopKind::Mul,
            TokenKind::EqualEqual => BinopKind::Eq,
            TokenKind::NotEqual => BinopKind::Neq,
            TokenKind::Less => BinopKind::Less,
            TokenKind::Greater => BinopKind::Greater,
            TokenKind::LessEqual => BinopKind::LessEq,
            TokenKind::GreaterEqual => BinopKind::GreaterEq,
            _ => {
                self.tokens.put_back(op_token);
                return None;
            }
        };
        Some((op, op_token))
    }

    /// expr ::= "-" term
    fn match_expr_negated(&mut self) -> MatchResult<NegExpr> {
        let neg_token = self.tokens.next();
        if neg_token.kind != TokenKind::Minus {
            self.tokens.put_back(neg_token);
            return Ok(None);
        }

        let Some(value) = self.match_term()? else {
            self.tokens.put_back(neg_token);
            return Ok(None);
        };

        Ok(Some(NegExpr {
            value: Box::new(value),
            tokens: vec![neg_token],
        }))
    }

    /// expr ::= "!" term
    fn match_expr_not(&mut self) -> MatchResult<NotExpr> {
        let not_token = self.tokens.next();
        if not_token.kind != TokenKind::Not {
            self.tokens.put_back(not_token);
            return Ok(None);
        }

        let Some(value) = self.match_term()? else {
            self.tokens.put_back(not_token);
            return Ok(None);
        };

        Ok(Some(NotExpr {
            value: Box::new(value),
            tokens: vec![not_token],
        }))
    }

    // --------------------------- terms ----------------------------

    /// The call and indexed alternatives come before the bare identifier,
    /// which is a prefix of both.
    fn match_term(&mut self) -> MatchResult<Term> {
        if let Some(t) = self.match_term_call()? {
            return Ok(Some(Term::Call(t)));
        }
        if let Some(t) = self.match_term_literal() {
            return Ok(Some(Term::Lit(t)));
        }
        if let Some(t) = self.match_term_addr_of() {
            return Ok(Some(Term::AddrOf(t)));
        }
        if let Some(t) = self.match_term_deref() {
            return Ok(Some(Term::Deref(t)));
        }
        if let Some(t) = self.match_term_indexed()? {
            return Ok(Some(Term::Indexed(t)));
        }
        if let Some(t) = self.match_term_identifier() {
            return Ok(Some(Term::Id(t)));
        }
        if let Some(t) = self.match_term_paren()? {
            return Ok(Some(Term::Paren(t)));
        }
        Ok(None)
    }

    /// term ::= ident
    fn match_term_identifier(&mut self) -> Option<IdTerm> {
        let id_token = self.tokens.next();
        let Some(identifier) = id_token.kind.ident().map(str::to_owned) else {
            self.tokens.put_back(id_token);
            return None;
        };

        Some(IdTerm {
            identifier,
            tokens: vec![id_token],
        })
    }

    /// term ::= int_lit
    fn match_term_literal(&mut self) -> Option<LitTerm> {
        let literal_token = self.tokens.next();
        let TokenKind::IntLiteral(literal) = literal_token.kind else {
            self.tokens.put_back(literal_token);
            return None;
        };

        Some(LitTerm {
            literal,
            tokens: vec![literal_token],
        })
    }

    /// term ::= ident "(" params? ")"
    fn match_term_call(&mut self) -> MatchResult<CallTerm> {
        let id_token = self.tokens.next();
        let open_paren = self.tokens.next();

        let identifier = id_token.kind.ident().map(str::to_owned);
        let (Some(identifier), TokenKind::OpenParen) = (identifier, &open_paren.kind) else {
            self.tokens.put_back(open_paren);
            self.tokens.put_back(id_token);
            return Ok(None);
        };

        let params = self.match_params();

        let closed_paren = self.tokens.next();
        if closed_paren.kind != TokenKind::ClosedParen {
            self.tokens.put_back(closed_paren);
            for param in params.into_iter().rev() {
                param.undo(&mut self.tokens);
            }
            self.tokens.put_back(open_paren);
            self.tokens.put_back(id_token);
            return Ok(None);
        }

        Ok(Some(CallTerm {
            identifier,
            params,
            tokens: vec![id_token, open_paren, closed_paren],
        }))
    }

    /// params ::= expr params | ε
    fn match_params(&mut self) -> Vec<Expr> {
        let mut params = vec![];
        loop {
            match self.match_expr() {
                Ok(param) => params.push(rewrite(param)),
                Err(_) => return params,
            }
        }
    }

    /// term ::= "&" ident
    fn match_term_addr_of(&mut self) -> Option<AddrOfTerm> {
        let ampersand_token = self.tokens.next();
        let id_token = self.tokens.next();

        let identifier = id_token.kind.ident().map(str::to_owned);
        let (TokenKind::Ampersand, Some(identifier)) = (&ampersand_token.kind, identifier) else {
            self.tokens.put_back(id_token);
            self.tokens.put_back(ampersand_token);
            return None;
        };

        Some(AddrOfTerm {
            identifier,
            tokens: vec![ampersand_token, id_token],
        })
    }

    /// term ::= "*" ident; dereference only at the start of a term.
    fn match_term_deref(&mut self) -> Option<DerefTerm> {
        let star_token = self.tokens.next();
        let id_token = self.tokens.next();

        let identifier = id_token.kind.ident().map(str::to_owned);
        let (TokenKind::Star, Some(identifier)) = (&star_token.kind, identifier) else {
            self.tokens.put_back(id_token);
            self.tokens.put_back(star_token);
            return None;
        };

        Some(DerefTerm {
            identifier,
            tokens: vec![star_token, id_token],
        })
    }

    /// term ::= ident "[" expr "]"
    fn match_term_indexed(&mut self) -> MatchResult<IndexedTerm> {
        let id_token = self.tokens.next();
        let open_bracket = self.tokens.next();

        let identifier = id_token.kind.ident().map(str::to_owned);
        let (Some(identifier), TokenKind::OpenBracket) = (identifier, &open_bracket.kind) else {
            self.tokens.put_back(open_bracket);
            self.tokens.put_back(id_token);
            return Ok(None);
        };

        let index = self.match_expr()?;

        let closed_bracket = self.tokens.next();
        if closed_bracket.kind != TokenKind::ClosedBracket {
            self.tokens.put_back(closed_bracket);
            index.undo(&mut self.tokens);
            self.tokens.put_back(open_bracket);
            self.tokens.put_back(id_token);
            return Ok(None);
        }

        Ok(Some(IndexedTerm {
            identifier,
            index: Box::new(rewrite(index)),
            tokens: vec![id_token, open_bracket, closed_bracket],
        }))
    }

    /// term ::= "(" expr ")"
    fn match_term_paren(&mut self) -> MatchResult<ParenTerm> {
        let open_paren = self.tokens.next();
        if open_paren.kind != TokenKind::OpenParen {
            self.tokens.put_back(open_paren);
            return Ok(None);
        }

        let expr = self.match_expr()?;

        let closed_paren = self.tokens.next();
        if closed_paren.kind != TokenKind::ClosedParen {
            self.tokens.put_back(closed_paren);
            expr.undo(&mut self.tokens);
            self.tokens.put_back(open_paren);
            return Ok(None);
        }

        Ok(Some(ParenTerm {
            expr: Box::new(rewrite(expr)),
            tokens: vec![open_paren, closed_paren],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(source: &str) -> Parser {
        Parser::from_lexer(Lexer::from_source(source))
    }

    fn drain(parser: &mut Parser) -> Vec<TokenKind> {
        let mut kinds = vec![];
        loop {
            let token = parser.tokens.next();
            if token.kind == TokenKind::Eof {
                return kinds;
            }
            kinds.push(token.kind);
        }
    }

    #[test]
    fn test_parse_global_var_decl() {
        let program = parser("int x = 5;").parse().unwrap();

        assert_eq!(program.decls.len(), 1);
        let Decl::Var(decl) = &program.decls[0] else {
            panic!("expected variable declaration");
        };
        assert_eq!(decl.identifier, "x");
        assert!(!decl.is_pointer);
        assert_eq!(decl.value.as_ref().unwrap().evaluate(), Some(5));
    }

    #[test]
    fn test_parse_pointer_decl() {
        let program = parser("int *p;").parse().unwrap();

        let Decl::Var(decl) = &program.decls[0] else {
            panic!("expected variable declaration");
        };
        assert!(decl.is_pointer);
        assert_eq!(decl.identifier, "p");
    }

    #[test]
    fn test_parse_function_prototype_and_definition() {
        let program = parser("int f(); int g(int a char *b) { return a; }")
            .parse()
            .unwrap();

        assert_eq!(program.decls.len(), 2);
        let Decl::Func(proto) = &program.decls[0] else {
            panic!("expected function");
        };
        assert!(proto.body.is_none());

        let Decl::Func(def) = &program.decls[1] else {
            panic!("expected function");
        };
        assert_eq!(def.identifier, "g");
        assert_eq!(def.params.len(), 2);
        assert!(def.params[1].is_pointer);
        assert!(def.body.is_some());
    }

    #[test]
    fn test_parse_array_declarations() {
        let program = parser("int a[10]; int b[] = { 1 2 3 }; char s[] = \"hi\";")
            .parse()
            .unwrap();

        assert_eq!(program.decls.len(), 3);
        assert!(matches!(
            program.decls[0],
            Decl::Array(ArrayDecl::Simple(_))
        ));
        let Decl::Array(ArrayDecl::InitList(b)) = &program.decls[1] else {
            panic!("expected init-list array");
        };
        assert_eq!(b.values.len(), 3);
        let Decl::Array(ArrayDecl::Str(s)) = &program.decls[2] else {
            panic!("expected string array");
        };
        assert_eq!(s.literal, "hi");
    }

    #[test]
    fn test_parse_statements() {
        let source = "int main() {
            int x = 1;
            x = x + 1;
            *p = 2;
            a[x] = 3;
            if (x == 2) x = 0; else x = 1;
            while (x < 10) x = x + 1;
            f(x 1);
            return x;
        }";
        let program = parser(source).parse().unwrap();

        let Decl::Func(def) = &program.decls[0] else {
            panic!("expected function");
        };
        let Some(Stmt::Block(block)) = &def.body else {
            panic!("expected block body");
        };
        assert_eq!(block.statements.len(), 8);
        assert!(matches!(block.statements[2], Stmt::DerefAssign(_)));
        assert!(matches!(block.statements[3], Stmt::IndexedAssign(_)));
        assert!(matches!(block.statements[4], Stmt::If(_)));
        assert!(matches!(block.statements[5], Stmt::While(_)));
        assert!(matches!(block.statements[6], Stmt::Expr(_)));
    }

    #[test]
    fn test_else_binds_to_nearest_if() {
        let source = "int main() { if (a) if (b) x = 1; else x = 2; }";
        let program = parser(source).parse().unwrap();

        let Decl::Func(def) = &program.decls[0] else {
            panic!("expected function");
        };
        let Some(Stmt::Block(block)) = &def.body else {
            panic!("expected block");
        };
        let Stmt::If(outer) = &block.statements[0] else {
            panic!("expected if");
        };
        assert!(outer.else_actions.is_none());
        let Stmt::If(inner) = outer.actions.as_ref() else {
            panic!("expected nested if");
        };
        assert!(inner.else_actions.is_some());
    }

    #[test]
    fn test_parse_asm_statement() {
        let source = "int main() { asm(\"add %0, %1, 4\" x y 4); }";
        let program = parser(source).parse().unwrap();

        let Decl::Func(def) = &program.decls[0] else {
            panic!("expected function");
        };
        let Some(Stmt::Block(block)) = &def.body else {
            panic!("expected block");
        };
        let Stmt::Asm(asm) = &block.statements[0] else {
            panic!("expected asm statement");
        };
        assert_eq!(asm.template, "add %0, %1, 4");
        assert_eq!(asm.params.len(), 3);
    }

    #[test]
    fn test_expressions_are_left_associative_after_parse() {
        let program = parser("int main() { return a - b - c; }").parse().unwrap();

        let Decl::Func(def) = &program.decls[0] else {
            panic!("expected function");
        };
        let Some(Stmt::Block(block)) = &def.body else {
            panic!("expected block");
        };
        let Stmt::Return(ret) = &block.statements[0] else {
            panic!("expected return");
        };
        assert_eq!(ret.return_value.ast_string(), "((a) - b) - c");
    }

    #[test]
    fn test_unary_and_terms() {
        let program = parser("int main() { x = -1; y = !x; z = &x; w = *p; v = a[2]; u = (1 + 2) * 3; }")
            .parse()
            .unwrap();
        let Decl::Func(def) = &program.decls[0] else {
            panic!("expected function");
        };
        let Some(Stmt::Block(block)) = &def.body else {
            panic!("expected block");
        };
        assert_eq!(block.statements.len(), 6);
    }

    #[test]
    fn test_syntax_error_carries_position() {
        let error = parser("int main() {\n  if (x ==) y = 1;\n}")
            .parse()
            .unwrap_err();

        assert_eq!(error.line, 2);
        assert!(error.message.contains("Unexpected"));
    }

    #[test]
    fn test_missing_semicolon_is_an_error() {
        assert!(parser("int main() { x = 1 }").parse().is_err());
    }

    #[test]
    fn test_unknown_token_is_reported() {
        let error = parser("int main() { x = $; }").parse().unwrap_err();
        assert!(error.message.contains("unknown"));
    }

    #[test]
    fn test_undo_restores_stream_after_failed_match() {
        // The declaration matches up to the missing semicolon and is then
        // undone; the stream must replay every token.
        let mut p = parser("int x = 1 + 2 )");
        assert!(p.match_decl_var().unwrap().is_none());

        let replayed = drain(&mut p);
        let expected = drain(&mut parser("int x = 1 + 2 )"));
        assert_eq!(replayed, expected);
    }

    #[test]
    fn test_undo_restores_stream_for_partial_function() {
        let source = "int f(int a char b) = 5";
        let mut p = parser(source);
        assert!(p.match_decl_func().unwrap().is_none());

        let replayed = drain(&mut p);
        let expected = drain(&mut parser(source));
        assert_eq!(replayed, expected);
    }

    #[test]
    fn test_manual_undo_round_trip() {
        let source = "while (i < 10) { i = i + 1; }";
        let mut p = parser(source);
        let stmt = p.match_stmt().unwrap();

        stmt.undo(&mut p.tokens);

        let replayed = drain(&mut p);
        let expected = drain(&mut parser(source));
        assert_eq!(replayed, expected);
    }
}
