use crate::lexer::{Token, TokenStream};

/// An expression as produced by the grammar: a unary operator applied to a
/// term, a binary-operator chain, or a bare term.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Neg(NegExpr),
    Not(NotExpr),
    Binop(BinopExpr),
    Term(Term),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NegExpr {
    pub value: Box<Term>,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotExpr {
    pub value: Box<Term>,
    pub tokens: Vec<Token>,
}

/// A binary operation. While right-associative (as parsed) `term` is the
/// left operand and `rest` the remaining chain; after the rewrite
/// `left_assoc` is set, `rest` is the left sub-expression and `term` the
/// right operand.
#[derive(Debug, Clone, PartialEq)]
pub struct BinopExpr {
    pub op: BinopKind,
    pub term: Box<Expr>,
    pub rest: Box<Expr>,
    pub left_assoc: bool,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinopKind {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Eq,
    Neq,
    Less,
    Greater,
    LessEq,
    GreaterEq,
}

impl BinopKind {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinopKind::Add => "+",
            BinopKind::Sub => "-",
            BinopKind::Mul => "*",
            BinopKind::And => "&",
            BinopKind::Or => "|",
            BinopKind::Eq => "==",
            BinopKind::Neq => "!=",
            BinopKind::Less => "<",
            BinopKind::Greater => ">",
            BinopKind::LessEq => "<=",
            BinopKind::GreaterEq => ">=",
        }
    }

    /// Whether this operator produces a 0/1 result through a compare and
    /// branch sequence.
    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            BinopKind::Eq
                | BinopKind::Neq
                | BinopKind::Less
                | BinopKind::Greater
                | BinopKind::LessEq
                | BinopKind::GreaterEq
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Id(IdTerm),
    Lit(LitTerm),
    Call(CallTerm),
    Paren(ParenTerm),
    AddrOf(AddrOfTerm),
    Deref(DerefTerm),
    Indexed(IndexedTerm),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdTerm {
    pub identifier: String,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LitTerm {
    pub literal: i32,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallTerm {
    pub identifier: String,
    pub params: Vec<Expr>,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParenTerm {
    pub expr: Box<Expr>,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddrOfTerm {
    pub identifier: String,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerefTerm {
    pub identifier: String,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedTerm {
    pub identifier: String,
    pub index: Box<Expr>,
    pub tokens: Vec<Token>,
}

impl Expr {
    pub fn position(&self) -> (usize, usize) {
        match self {
            Expr::Neg(e) => e.tokens.first().map(Token::position).unwrap_or((0, 0)),
            Expr::Not(e) => e.tokens.first().map(Token::position).unwrap_or((0, 0)),
            Expr::Binop(e) => e.tokens.first().map(Token::position).unwrap_or((0, 0)),
            Expr::Term(t) => t.position(),
        }
    }

    /// Push every consumed token back to the stream, children first where
    /// they were consumed last.
    pub fn undo(self, stream: &mut TokenStream) {
        match self {
            Expr::Neg(mut e) => {
                e.value.undo(stream);
                stream.put_back(e.tokens.pop().unwrap());
            }
            Expr::Not(mut e) => {
                e.value.undo(stream);
                stream.put_back(e.tokens.pop().unwrap());
            }
            Expr::Binop(mut e) => {
                if e.left_assoc {
                    e.term.undo(stream);
                    stream.put_back(e.tokens.pop().unwrap());
                    e.rest.undo(stream);
                } else {
                    e.rest.undo(stream);
                    stream.put_back(e.tokens.pop().unwrap());
                    e.term.undo(stream);
                }
            }
            Expr::Term(t) => t.undo(stream),
        }
    }

    /// Constant-evaluate this expression, assuming binary chains are
    /// left-associative.
    pub fn evaluate(&self) -> Option<i32> {
        match self {
            Expr::Neg(e) => e.value.evaluate().map(i32::wrapping_neg),
            Expr::Not(e) => e.value.evaluate().map(|v| i32::from(v == 0)),
            Expr::Binop(e) => {
                let rest = e.rest.evaluate()?;
                let term = e.term.evaluate()?;
                Some(match e.op {
                    BinopKind::Add => rest.wrapping_add(term),
                    BinopKind::Sub => rest.wrapping_sub(term),
                    BinopKind::Mul => rest.wrapping_mul(term),
                    BinopKind::And => rest & term,
                    BinopKind::Or => rest | term,
                    BinopKind::Eq => i32::from(rest == term),
                    BinopKind::Neq => i32::from(rest != term),
                    BinopKind::Less => i32::from(rest < term),
                    BinopKind::Greater => i32::from(rest > term),
                    BinopKind::LessEq => i32::from(rest <= term),
                    BinopKind::GreaterEq => i32::from(rest >= term),
                })
            }
            Expr::Term(t) => t.evaluate(),
        }
    }

    /// Whether evaluating this expression involves a call (and therefore
    /// clobbers the register file).
    pub fn contains_call(&self) -> bool {
        match self {
            Expr::Neg(e) => e.value.contains_call(),
            Expr::Not(e) => e.value.contains_call(),
            Expr::Binop(e) => e.rest.contains_call() || e.term.contains_call(),
            Expr::Term(t) => t.contains_call(),
        }
    }

    pub fn ast_string(&self) -> String {
        match self {
            Expr::Neg(e) => format!("- {}", e.value.ast_string()),
            Expr::Not(e) => format!("! {}", e.value.ast_string()),
            Expr::Binop(e) => {
                if e.left_assoc {
                    format!(
                        "({}) {} {}",
                        e.rest.ast_string(),
                        e.op.symbol(),
                        e.term.ast_string()
                    )
                } else {
                    format!(
                        "{} {} ({})",
                        e.term.ast_string(),
                        e.op.symbol(),
                        e.rest.ast_string()
                    )
                }
            }
            Expr::Term(t) => t.ast_string(),
        }
    }
}

macro_rules! term_position {
    ($($name:ident),*) => {
        $(impl $name {
            pub fn position(&self) -> (usize, usize) {
                self.tokens.first().map(Token::position).unwrap_or((0, 0))
            }
        })*
    };
}

term_position!(IdTerm, LitTerm, CallTerm, ParenTerm, AddrOfTerm, DerefTerm, IndexedTerm);

impl Term {
    pub fn position(&self) -> (usize, usize) {
        let tokens = match self {
            Term::Id(t) => &t.tokens,
            Term::Lit(t) => &t.tokens,
            Term::Call(t) => &t.tokens,
            Term::Paren(t) => &t.tokens,
            Term::AddrOf(t) => &t.tokens,
            Term::Deref(t) => &t.tokens,
            Term::Indexed(t) => &t.tokens,
        };
        tokens.first().map(Token::position).unwrap_or((0, 0))
    }

    pub fn undo(self, stream: &mut TokenStream) {
        match self {
            Term::Id(mut t) => stream.put_back(t.tokens.pop().unwrap()),
            Term::Lit(mut t) => stream.put_back(t.tokens.pop().unwrap()),
            Term::Call(mut t) => {
                stream.put_back(t.tokens.pop().unwrap()); // ')'
                for param in t.params.into_iter().rev() {
                    param.undo(stream);
                }
                stream.put_back(t.tokens.pop().unwrap()); // '('
                stream.put_back(t.tokens.pop().unwrap()); // identifier
            }
            Term::Paren(mut t) => {
                stream.put_back(t.tokens.pop().unwrap()); // ')'
                t.expr.undo(stream);
                stream.put_back(t.tokens.pop().unwrap()); // '('
            }
            Term::AddrOf(mut t) => {
                stream.put_back(t.tokens.pop().unwrap()); // identifier
                stream.put_back(t.tokens.pop().unwrap()); // '&'
            }
            Term::Deref(mut t) => {
                stream.put_back(t.tokens.pop().unwrap()); // identifier
                stream.put_back(t.tokens.pop().unwrap()); // '*'
            }
            Term::Indexed(mut t) => {
                stream.put_back(t.tokens.pop().unwrap()); // ']'
                t.index.undo(stream);
                stream.put_back(t.tokens.pop().unwrap()); // '['
                stream.put_back(t.tokens.pop().unwrap()); // identifier
            }
        }
    }

    pub fn evaluate(&self) -> Option<i32> {
        match self {
            Term::Lit(t) => Some(t.literal),
            Term::Paren(t) => t.expr.evaluate(),
            _ => None,
        }
    }

    pub fn contains_call(&self) -> bool {
        match self {
            Term::Call(_) => true,
            Term::Paren(t) => t.expr.contains_call(),
            Term::Indexed(t) => t.index.contains_call(),
            _ => false,
        }
    }

    pub fn ast_string(&self) -> String {
        match self {
            Term::Id(t) => t.identifier.clone(),
            Term::Lit(t) => t.literal.to_string(),
            Term::Call(t) => {
                let params = t
                    .params
                    .iter()
                    .map(Expr::ast_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("{}({})", t.identifier, params)
            }
            Term::Paren(t) => format!("({})", t.expr.ast_string()),
            Term::AddrOf(t) => format!("&{}", t.identifier),
            Term::Deref(t) => format!("*{}", t.identifier),
            Term::Indexed(t) => format!("{}[{}]", t.identifier, t.index.ast_string()),
        }
    }
}

/// Rebuild a right-associative operator chain as a left-associative one.
///
/// The spine of `rest` links is flattened, then folded back left-leaning:
/// `a - b - c` becomes `((a) - b) - c`. Operator tokens travel to the new
/// nodes; non-binop expressions pass through untouched.
pub fn rewrite(expr: Expr) -> Expr {
    let root = match expr {
        Expr::Binop(root) if !root.left_assoc => root,
        other => return other,
    };

    let mut links: Vec<(BinopKind, Vec<Token>, Expr)> = vec![];
    let mut current = root;
    let deepest = loop {
        let BinopExpr {
            op, term, rest, tokens, ..
        } = current;
        links.push((op, tokens, *term));
        match *rest {
            Expr::Binop(next) if !next.left_assoc => current = next,
            other => break other,
        }
    };

    let mut links = links.into_iter();
    let (first_op, first_tokens, first_term) = links.next().unwrap();
    let mut acc = first_term;
    let mut pending = (first_op, first_tokens);

    for (op, tokens, term) in links {
        let (prev_op, prev_tokens) = pending;
        acc = Expr::Binop(BinopExpr {
            op: prev_op,
            rest: Box::new(acc),
            term: Box::new(term),
            left_assoc: true,
            tokens: prev_tokens,
        });
        pending = (op, tokens);
    }

    let (last_op, last_tokens) = pending;
    Expr::Binop(BinopExpr {
        op: last_op,
        rest: Box::new(acc),
        term: Box::new(deepest),
        left_assoc: true,
        tokens: last_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::TokenKind;

    fn id(name: &str) -> Expr {
        Expr::Term(Term::Id(IdTerm {
            identifier: name.into(),
            tokens: vec![Token::new(TokenKind::Ident(name.into()), 1, 1)],
        }))
    }

    fn lit(value: i32) -> Expr {
        Expr::Term(Term::Lit(LitTerm {
            literal: value,
            tokens: vec![Token::new(TokenKind::IntLiteral(value), 1, 1)],
        }))
    }

    fn binop(op: BinopKind, term: Expr, rest: Expr) -> Expr {
        Expr::Binop(BinopExpr {
            op,
            term: Box::new(term),
            rest: Box::new(rest),
            left_assoc: false,
            tokens: vec![Token::new(TokenKind::Minus, 1, 1)],
        })
    }

    fn assert_left_assoc(expr: &Expr) {
        if let Expr::Binop(b) = expr {
            assert!(b.left_assoc);
            assert_left_assoc(&b.rest);
            assert_left_assoc(&b.term);
        }
    }

    #[test]
    fn test_rewrite_chain_of_three() {
        // a - b - c parses right-associated.
        let parsed = binop(
            BinopKind::Sub,
            id("a"),
            binop(BinopKind::Sub, id("b"), id("c")),
        );

        let rewritten = rewrite(parsed);
        assert_left_assoc(&rewritten);
        assert_eq!(rewritten.ast_string(), "((a) - b) - c");
    }

    #[test]
    fn test_rewrite_single_binop() {
        let parsed = binop(BinopKind::Sub, id("a"), id("b"));

        let rewritten = rewrite(parsed);
        assert_left_assoc(&rewritten);
        assert_eq!(rewritten.ast_string(), "(a) - b");
    }

    #[test]
    fn test_rewrite_leaves_terms_alone() {
        let term = id("x");
        assert_eq!(rewrite(term.clone()), term);
    }

    #[test]
    fn test_rewrite_fixes_subtraction_order() {
        // 10 - 4 - 3 must evaluate to 3, not 9.
        let parsed = binop(
            BinopKind::Sub,
            lit(10),
            binop(BinopKind::Sub, lit(4), lit(3)),
        );

        assert_eq!(rewrite(parsed).evaluate(), Some(3));
    }

    #[test]
    fn test_evaluate_folds_constants() {
        let sum = rewrite(binop(BinopKind::Add, lit(2), lit(3)));
        assert_eq!(sum.evaluate(), Some(5));

        let relation = rewrite(binop(BinopKind::Less, lit(2), lit(3)));
        assert_eq!(relation.evaluate(), Some(1));
    }

    #[test]
    fn test_evaluate_fails_on_identifiers() {
        assert_eq!(id("x").evaluate(), None);
        assert_eq!(rewrite(binop(BinopKind::Add, id("x"), lit(1))).evaluate(), None);
    }

    #[test]
    fn test_evaluate_unary() {
        let neg = Expr::Neg(NegExpr {
            value: Box::new(Term::Lit(LitTerm {
                literal: 5,
                tokens: vec![],
            })),
            tokens: vec![],
        });
        assert_eq!(neg.evaluate(), Some(-5));

        let not = Expr::Not(NotExpr {
            value: Box::new(Term::Lit(LitTerm {
                literal: 0,
                tokens: vec![],
            })),
            tokens: vec![],
        });
        assert_eq!(not.evaluate(), Some(1));
    }
}
