//! Syntax tree for directive programs and whole documents.
//!
//! Every node has exactly one owner; dropping the root drops the tree.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOpKind {
    Read,
    Write,
    Exists,
    Delete,
    List,
}

impl FileOpKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "read" => FileOpKind::Read,
            "write" => FileOpKind::Write,
            "exists" => FileOpKind::Exists,
            "delete" => FileOpKind::Delete,
            "list" => FileOpKind::List,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            FileOpKind::Read => "read",
            FileOpKind::Write => "write",
            FileOpKind::Exists => "exists",
            FileOpKind::Delete => "delete",
            FileOpKind::List => "list",
        }
    }
}

/// Where an assignment stores its value.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Property { object: Box<Node>, key: String },
    Index { object: Box<Node>, index: Box<Node> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Node,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Node,
    pub private: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub parent: Option<String>,
    pub methods: Vec<MethodDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Literal(Literal),
    Identifier(String),
    Binary { op: BinOp, lhs: Box<Node>, rhs: Box<Node> },
    Unary { op: UnaryOp, operand: Box<Node> },
    Assign { target: Target, op: AssignOp, value: Box<Node> },
    Block(Vec<Node>),
    /// `if`/`elif` branches in order, then the optional `else`.
    Conditional { branches: Vec<(Node, Node)>, otherwise: Option<Box<Node>> },
    ForIn { var: String, iterable: Box<Node>, body: Box<Node> },
    While { cond: Box<Node>, body: Box<Node> },
    /// Inclusive numeric range `start .. end`.
    Range { start: Box<Node>, end: Box<Node> },
    Break,
    Continue,
    Return(Option<Box<Node>>),
    Function(Box<FunctionDef>),
    Class(Box<ClassDef>),
    Call { name: String, args: Vec<Node> },
    MethodCall { object: Box<Node>, method: String, args: Vec<Node> },
    Array(Vec<Node>),
    Object(Vec<(String, Node)>),
    Property { object: Box<Node>, key: String },
    Index { object: Box<Node>, index: Box<Node> },
    File { op: FileOpKind, path: Box<Node>, content: Option<Box<Node>> },
    /// Literal document text; `{{name}}` references are substituted when it
    /// is emitted.
    Text(String),
    /// One directive's program.  Evaluation errors inside are contained here.
    /// A `standalone` directive sat alone on its source line; its output is
    /// terminated with a newline.
    Directive { body: Box<Node>, line: usize, standalone: bool },
}

impl Node {
    pub fn null() -> Self {
        Node::Literal(Literal::Null)
    }

    pub fn number(n: f64) -> Self {
        Node::Literal(Literal::Number(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Node::Literal(Literal::String(s.into()))
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Node::Identifier(name.into())
    }

    /// Statements of a block, or the node itself as a one-element slice.
    pub fn statements(&self) -> &[Node] {
        match self {
            Node::Block(stmts) => stmts,
            other => std::slice::from_ref(other),
        }
    }

    /// Convert an expression into an assignment target, if it names one.
    pub fn into_target(self) -> Option<Target> {
        match self {
            Node::Identifier(name) => Some(Target::Name(name)),
            Node::Property { object, key } => Some(Target::Property { object, key }),
            Node::Index { object, index } => Some(Target::Index { object, index }),
            _ => None,
        }
    }
}
