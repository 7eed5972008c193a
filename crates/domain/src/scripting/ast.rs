//! Tagged syntax tree produced by the parser
//!
//! Only whitelisted constructs have a representation here, so anything the
//! interpreter sees has already passed validation.

/// Functions callable from scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Roll,
    Damage,
    Heal,
    Move,
    Say,
    Set,
    Trigger,
}

impl Builtin {
    pub const ALL: [Builtin; 7] = [
        Builtin::Roll,
        Builtin::Damage,
        Builtin::Heal,
        Builtin::Move,
        Builtin::Say,
        Builtin::Set,
        Builtin::Trigger,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Roll => "roll",
            Self::Damage => "damage",
            Self::Heal => "heal",
            Self::Move => "move",
            Self::Say => "say",
            Self::Set => "set",
            Self::Trigger => "trigger",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Self::Move | Self::Set => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Nil,
    Name(String),
    /// Tuple or list literal
    Sequence(Vec<Expr>),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Chained comparison: `a < b <= c` means `a < b and b <= c`
    Compare {
        first: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Call {
        builtin: Builtin,
        args: Vec<Expr>,
    },
}

/// Left-hand side of an assignment
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Index { name: String, index: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Assign {
        target: Target,
        value: Expr,
    },
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Vec<Stmt>,
    },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub line: usize,
    pub kind: StmtKind,
}

/// A parsed and validated script
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
}

impl Program {
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}
