/*!
Abstract syntax tree for gating condition expressions.
*/

/// Literal values in condition expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
}

/// Binary operators, listed loosest-binding first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Or,
    And,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negate,
}

/// A parsed condition expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(LiteralValue),
    /// Bare identifier; `channel` and `record` are bound at evaluation time.
    Identifier(String),
    /// History reference for a channel name or `*`-glob.
    ChannelRef(String),
    Unary {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    /// Attribute access, `base.name`.
    Attribute {
        base: Box<Expr>,
        name: String,
    },
    /// Subscript, `base[index]`.
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// The `len(expr)` builtin.
    Len(Box<Expr>),
}

impl Expr {
    /// Collects every channel spec referenced anywhere in the expression,
    /// in first-appearance order without duplicates.
    pub fn channel_refs(&self) -> Vec<String> {
        let mut specs = Vec::new();
        self.walk(&mut |expr| {
            if let Expr::ChannelRef(spec) = expr {
                if !specs.contains(spec) {
                    specs.push(spec.clone());
                }
            }
        });
        specs
    }

    /// Depth-first traversal over all nodes.
    pub fn walk(&self, visit: &mut dyn FnMut(&Expr)) {
        visit(self);
        match self {
            Expr::Literal(_) | Expr::Identifier(_) | Expr::ChannelRef(_) => {}
            Expr::Unary { operand, .. } => operand.walk(visit),
            Expr::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::Attribute { base, .. } => base.walk(visit),
            Expr::Index { base, index } => {
                base.walk(visit);
                index.walk(visit);
            }
            Expr::Len(inner) => inner.walk(visit),
        }
    }
}
