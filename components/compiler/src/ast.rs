//! The AST the compiler lowers.
//!
//! Nodes are plain owned data (`String` keys, no interning) so parsed modules
//! can cross thread boundaries in the loader's parse pipeline. Every node
//! carries the source line it starts on for the chunk line table; statements
//! additionally carry full spans for diagnostics.

use core_types::Span;

/// A parsed compilation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Top-level statements in source order.
    pub body: Vec<Stmt>,
}

impl Program {
    /// True when any statement is an import or export declaration.
    pub fn has_module_syntax(&self) -> bool {
        self.body.iter().any(|s| {
            matches!(
                s.kind,
                StmtKind::Import(_) | StmtKind::Export(_)
            )
        })
    }

    /// True when an `await` appears outside any function body.
    pub fn has_top_level_await(&self) -> bool {
        fn stmt_has_await(stmt: &Stmt) -> bool {
            match &stmt.kind {
                StmtKind::VarDecl { declarators, .. } => declarators
                    .iter()
                    .any(|d| d.init.as_ref().is_some_and(expr_has_await)),
                StmtKind::ExprStmt(e) | StmtKind::Throw(e) => expr_has_await(e),
                StmtKind::Return(Some(e)) => expr_has_await(e),
                StmtKind::If {
                    test,
                    consequent,
                    alternate,
                } => {
                    expr_has_await(test)
                        || stmt_has_await(consequent)
                        || alternate.as_deref().is_some_and(stmt_has_await)
                }
                StmtKind::While { test, body } => expr_has_await(test) || stmt_has_await(body),
                StmtKind::For {
                    init,
                    test,
                    update,
                    body,
                } => {
                    init.as_deref().is_some_and(stmt_has_await)
                        || test.as_ref().is_some_and(expr_has_await)
                        || update.as_ref().is_some_and(expr_has_await)
                        || stmt_has_await(body)
                }
                StmtKind::Block(body) => body.iter().any(stmt_has_await),
                StmtKind::Try {
                    block,
                    catch,
                    finally,
                    ..
                } => {
                    block.iter().any(stmt_has_await)
                        || catch.as_ref().is_some_and(|b| b.iter().any(stmt_has_await))
                        || finally.as_ref().is_some_and(|b| b.iter().any(stmt_has_await))
                }
                StmtKind::Export(ExportDecl::Default(e)) => expr_has_await(e),
                _ => false,
            }
        }
        fn expr_has_await(expr: &Expr) -> bool {
            match &expr.kind {
                ExprKind::Await(_) => true,
                ExprKind::Unary { expr, .. } => expr_has_await(expr),
                ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logical { lhs, rhs, .. } => {
                    expr_has_await(lhs) || expr_has_await(rhs)
                }
                ExprKind::Assign { value, .. } => expr_has_await(value),
                ExprKind::Cond { test, cons, alt } => {
                    expr_has_await(test) || expr_has_await(cons) || expr_has_await(alt)
                }
                ExprKind::Call { callee, args } | ExprKind::New { callee, args } => {
                    expr_has_await(callee) || args.iter().any(expr_has_await)
                }
                ExprKind::Member { obj, .. } => expr_has_await(obj),
                ExprKind::Index { obj, index } => expr_has_await(obj) || expr_has_await(index),
                ExprKind::Array(items) => items.iter().any(expr_has_await),
                ExprKind::Object(props) => props.iter().any(|p| match &p.value {
                    ObjPropValue::Value(e) => expr_has_await(e),
                    _ => false,
                }),
                _ => false,
            }
        }
        self.body.iter().any(stmt_has_await)
    }
}

/// Declaration keyword of a variable statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// Function-scoped, hoisted.
    Var,
    /// Block-scoped, mutable.
    Let,
    /// Block-scoped, immutable binding.
    Const,
}

/// One declarator of a variable statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    /// Bound name.
    pub name: String,
    /// Initializer, when present.
    pub init: Option<Expr>,
}

/// A function literal or declaration body.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// Name, for declarations and named expressions.
    pub name: Option<String>,
    /// Parameters in order.
    pub params: Vec<Param>,
    /// Body statements.
    pub body: Vec<Stmt>,
    /// True for `async` functions.
    pub is_async: bool,
    /// True for arrow functions (no own `this`).
    pub is_arrow: bool,
    /// Line the function starts on.
    pub line: u32,
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// True for a `...rest` parameter (always last).
    pub rest: bool,
}

/// A statement with its span.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// The statement itself.
    pub kind: StmtKind,
    /// Line the statement starts on.
    pub line: u32,
    /// Full source span.
    pub span: Span,
}

/// Statement forms.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `let` / `const` / `var` with one or more declarators.
    VarDecl {
        /// Declaration keyword.
        kind: VarKind,
        /// The declarators.
        declarators: Vec<Declarator>,
    },
    /// `function f(…) { … }` (or `async function`).
    FuncDecl(Function),
    /// `return` with optional argument.
    Return(Option<Expr>),
    /// An expression in statement position.
    ExprStmt(Expr),
    /// `if` / `else`.
    If {
        /// Condition.
        test: Expr,
        /// Then branch.
        consequent: Box<Stmt>,
        /// Else branch.
        alternate: Option<Box<Stmt>>,
    },
    /// `while` loop.
    While {
        /// Condition.
        test: Expr,
        /// Body.
        body: Box<Stmt>,
    },
    /// Classic `for (init; test; update)` loop.
    For {
        /// Initializer statement (var decl or expression).
        init: Option<Box<Stmt>>,
        /// Loop condition.
        test: Option<Expr>,
        /// Update expression.
        update: Option<Expr>,
        /// Body.
        body: Box<Stmt>,
    },
    /// `{ … }` block.
    Block(Vec<Stmt>),
    /// `throw`.
    Throw(Expr),
    /// `try` / `catch` / `finally`.
    Try {
        /// Protected statements.
        block: Vec<Stmt>,
        /// Catch parameter name, when the clause binds one.
        catch_param: Option<String>,
        /// Catch body, when present.
        catch: Option<Vec<Stmt>>,
        /// Finally body, when present.
        finally: Option<Vec<Stmt>>,
    },
    /// `break`.
    Break,
    /// `continue`.
    Continue,
    /// `import …`.
    Import(ImportDecl),
    /// `export …`.
    Export(ExportDecl),
    /// Stray `;`.
    Empty,
}

/// An import declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    /// The module specifier as written.
    pub specifier: String,
    /// Local name bound to the default export, when present.
    pub default: Option<String>,
    /// Named imports as `(imported, local)` pairs.
    pub named: Vec<(String, String)>,
    /// Import attributes (`with { type: "json" }`).
    pub attributes: Vec<(String, String)>,
}

/// An export declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportDecl {
    /// `export <declaration>`.
    Decl(Box<Stmt>),
    /// `export { a, b as c }`.
    List(Vec<(String, String)>),
    /// `export default <expr>`.
    Default(Expr),
}

/// An expression with its source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// The expression itself.
    pub kind: ExprKind,
    /// Line the expression starts on.
    pub line: u32,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    Plus,
    /// `!x`
    Not,
    /// `~x`
    BitNot,
    /// `typeof x`
    TypeOf,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `**`
    Pow,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    UShr,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNe,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Short-circuiting operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// `&&`
    And,
    /// `||`
    Or,
    /// `??`
    Nullish,
}

/// Assignment targets.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    /// `name = …`
    Ident(String),
    /// `obj.prop = …`
    Member {
        /// Object expression.
        obj: Box<Expr>,
        /// Property name.
        prop: String,
    },
    /// `obj[idx] = …`
    Index {
        /// Object expression.
        obj: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
}

/// One property of an object literal.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjProp {
    /// Property key.
    pub key: String,
    /// What the property holds.
    pub value: ObjPropValue,
}

/// Property payload in an object literal.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjPropValue {
    /// `key: expr` (or shorthand / method form).
    Value(Expr),
    /// `get key() { … }`
    Getter(Function),
    /// `set key(v) { … }`
    Setter(Function),
}

/// Expression forms.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Numeric literal.
    Number(f64),
    /// BigInt literal (digits without the `n`).
    BigInt(String),
    /// String literal.
    String(String),
    /// Boolean literal.
    Bool(bool),
    /// `null`.
    Null,
    /// `undefined`.
    Undefined,
    /// Identifier reference.
    Ident(String),
    /// `this`.
    This,
    /// Array literal.
    Array(Vec<Expr>),
    /// Object literal.
    Object(Vec<ObjProp>),
    /// Function literal (arrow or `function` expression).
    Func(Function),
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        expr: Box<Expr>,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Short-circuiting operation.
    Logical {
        /// Operator.
        op: LogicalOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Assignment, plain or compound.
    Assign {
        /// Target.
        target: AssignTarget,
        /// Compound operator, `None` for plain `=`.
        op: Option<BinaryOp>,
        /// Right-hand side.
        value: Box<Expr>,
    },
    /// Prefix or postfix `++` / `--`.
    Update {
        /// Target.
        target: AssignTarget,
        /// True for `++`, false for `--`.
        inc: bool,
        /// True when the operator is prefix.
        prefix: bool,
    },
    /// Ternary conditional.
    Cond {
        /// Condition.
        test: Box<Expr>,
        /// Value when truthy.
        cons: Box<Expr>,
        /// Value when falsy.
        alt: Box<Expr>,
    },
    /// Call.
    Call {
        /// Callee expression.
        callee: Box<Expr>,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// `new` expression.
    New {
        /// Constructor expression.
        callee: Box<Expr>,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// Property access `obj.prop`.
    Member {
        /// Object expression.
        obj: Box<Expr>,
        /// Property name.
        prop: String,
    },
    /// Indexed access `obj[idx]`.
    Index {
        /// Object expression.
        obj: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
    /// `await expr`.
    Await(Box<Expr>),
    /// `delete obj.prop` / `delete obj[idx]`.
    Delete(Box<Expr>),
}
