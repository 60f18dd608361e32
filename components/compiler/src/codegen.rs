//! Bytecode emission.
//!
//! Lowers the AST to chunks. One `FunctionBuilder` exists per function being
//! compiled; builders form a stack so upvalue resolution can walk enclosing
//! functions. Every global and module-scope name is routed through the
//! session's shared `HeapAllocator`, and one inline-cache slot is reserved
//! per property, index, and method-call site.

use crate::ast::*;
use crate::checker::{CheckMode, TypeCheck};
use bytecode::{Chunk, Constant, Opcode, Reg, UpvalueDesc};
use core_types::{codes, Diagnostic, DiagnosticKind, HeapAllocator};
use num_bigint::BigInt;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

/// Resolves imports during module compilation.
///
/// Implemented by the module loader: given a specifier and the importing
/// module's path, it hands back the exporter's `name → global slot` map so
/// the compiler can emit direct global loads.
pub trait ImportResolver {
    /// Export map of the module `specifier` names, relative to `importer`.
    fn export_globals(
        &self,
        specifier: &str,
        importer: &str,
    ) -> Result<HashMap<String, u16>, Diagnostic>;
}

/// Compiler switches.
#[derive(Debug, Clone, Default)]
pub struct CompilerOptions {
    /// Proceed past type errors with `any` fallback typing.
    pub ignore_type_errors: bool,
}

/// The result of compiling a module.
#[derive(Debug, Clone)]
pub struct ModuleArtifact {
    /// The module's top-level chunk; runs once, in dependency order.
    pub chunk: Arc<Chunk>,
    /// Export name → global slot, registered with the shared allocator.
    pub exports: Vec<(String, u16)>,
}

const MAX_REGISTERS: u16 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingKind {
    Mutable,
    Const,
}

#[derive(Debug)]
struct Local {
    name: String,
    reg: Reg,
    depth: u32,
    kind: BindingKind,
    captured: bool,
}

#[derive(Debug, Default)]
struct LoopCtx {
    break_jumps: Vec<usize>,
    continue_jumps: Vec<usize>,
}

#[derive(Debug)]
struct FunctionBuilder {
    chunk: Chunk,
    locals: Vec<Local>,
    scope_depth: u32,
    next_reg: u16,
    high_water: u16,
    upvalues: Vec<(UpvalueDesc, String)>,
    loops: Vec<LoopCtx>,
    is_async: bool,
    track_completion: bool,
    result_reg: Option<Reg>,
}

impl FunctionBuilder {
    fn new(name: Option<String>, arity: u8, is_variadic: bool, is_async: bool) -> Self {
        let mut chunk = Chunk::new();
        chunk.name = name;
        chunk.arity = arity;
        chunk.is_variadic = is_variadic;
        chunk.is_async = is_async;
        Self {
            chunk,
            locals: Vec::new(),
            scope_depth: 0,
            next_reg: 0,
            high_water: 0,
            upvalues: Vec::new(),
            loops: Vec::new(),
            is_async,
            track_completion: false,
            result_reg: None,
        }
    }
}

enum Binding {
    Local(Reg, BindingKind),
    Upvalue(u8),
    Global(u16, BindingKind),
}

struct ModuleCtx<'a> {
    path: String,
    resolver: &'a dyn ImportResolver,
    /// Module-scope declaration name → mangled global slot.
    bindings: HashMap<String, u16>,
    /// Imported local name → exporter's global slot.
    imports: HashMap<String, u16>,
    exports: Vec<(String, u16)>,
}

/// The bytecode compiler.
///
/// One instance compiles one unit (script, expression, or module); the
/// shared `HeapAllocator` outlives it and carries slot assignments across
/// units in a session.
pub struct Compiler<'a> {
    heap: &'a mut HeapAllocator,
    checker: Option<&'a mut dyn TypeCheck>,
    options: CompilerOptions,
    builders: Vec<FunctionBuilder>,
    module: Option<ModuleCtx<'a>>,
    const_globals: HashSet<u16>,
    wrap_completion_next: bool,
}

type CResult<T> = Result<T, Diagnostic>;

impl<'a> Compiler<'a> {
    /// Creates a compiler over the session's allocator.
    pub fn new(heap: &'a mut HeapAllocator) -> Self {
        Self {
            heap,
            checker: None,
            options: CompilerOptions::default(),
            builders: Vec::new(),
            module: None,
            const_globals: HashSet::new(),
            wrap_completion_next: false,
        }
    }

    /// Sets the type checker to delegate to before lowering.
    pub fn with_checker(mut self, checker: &'a mut dyn TypeCheck) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Sets compiler switches.
    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    fn run_checker(&mut self, program: &Program, mode: CheckMode) -> CResult<()> {
        if let Some(checker) = self.checker.as_mut() {
            let diags = checker.check(program, mode);
            if !self.options.ignore_type_errors {
                if let Some(error) = diags
                    .into_iter()
                    .find(|d| d.severity == core_types::Severity::Error)
                {
                    return Err(error);
                }
            } else {
                for diag in &diags {
                    log::warn!("type diagnostic ignored: {}", diag);
                }
            }
        }
        Ok(())
    }

    /// Compiles a script or REPL/expression input.
    ///
    /// Top-level `await` is handled by wrapping the whole input in an
    /// immediately-called async function, so the chunk evaluates to the
    /// promise of its completion value.
    pub fn compile_script(mut self, program: &Program) -> CResult<Arc<Chunk>> {
        self.run_checker(program, CheckMode::Script)?;
        if program.has_module_syntax() {
            return Err(Diagnostic::error(
                codes::COMPILE_UNSUPPORTED,
                DiagnosticKind::Compile,
                "import/export requires module mode",
            ));
        }

        let mut top = FunctionBuilder::new(Some("<main>".to_string()), 0, false, false);
        top.track_completion = true;
        self.builders.push(top);
        let result = self.alloc_reg(1)?;
        self.cur().result_reg = Some(result);
        self.emit(Opcode::LoadUndefined { dst: result }, 1);

        if program.has_top_level_await() {
            let wrapper = Function {
                name: Some("<async-entry>".to_string()),
                params: Vec::new(),
                body: program.body.clone(),
                is_async: true,
                is_arrow: true,
                line: 1,
            };
            let f = self.alloc_reg(1)?;
            self.wrap_completion_next = true;
            self.compile_function(&wrapper, f)?;
            self.emit(
                Opcode::Call {
                    dst: result,
                    callee: f,
                    argc: 0,
                },
                1,
            );
        } else {
            for stmt in &program.body {
                self.statement(stmt)?;
            }
        }
        self.emit(Opcode::Return { src: result }, last_line(program));
        Ok(Arc::new(self.finish_builder()))
    }

    /// Compiles a module: registers exports with the shared allocator,
    /// resolves imports to direct global slots, and emits the top-level code
    /// as a chunk that runs once.
    pub fn compile_module(
        mut self,
        program: &Program,
        module_path: &str,
        resolver: &'a dyn ImportResolver,
    ) -> CResult<ModuleArtifact> {
        self.run_checker(program, CheckMode::Module)?;
        self.module = Some(ModuleCtx {
            path: module_path.to_string(),
            resolver,
            bindings: HashMap::new(),
            imports: HashMap::new(),
            exports: Vec::new(),
        });
        self.hoist_module_bindings(program)?;

        let mut top = FunctionBuilder::new(Some(module_path.to_string()), 0, false, false);
        top.track_completion = true;
        self.builders.push(top);
        let result = self.alloc_reg(1)?;
        self.cur().result_reg = Some(result);
        self.emit(Opcode::LoadUndefined { dst: result }, 1);

        for stmt in &program.body {
            self.statement(stmt)?;
        }
        self.emit(Opcode::Return { src: result }, last_line(program));
        let chunk = Arc::new(self.finish_builder());
        let exports = self.module.take().map(|m| m.exports).unwrap_or_default();
        Ok(ModuleArtifact { chunk, exports })
    }

    /// Pre-pass: every module-scope declaration gets its mangled global slot
    /// before any statement compiles, so forward references resolve to the
    /// module's own binding rather than a bare global.
    fn hoist_module_bindings(&mut self, program: &Program) -> CResult<()> {
        let mut declared: Vec<(String, BindingKind)> = Vec::new();
        for stmt in &program.body {
            let inner = match &stmt.kind {
                StmtKind::Export(ExportDecl::Decl(decl)) => &decl.kind,
                other => other,
            };
            match inner {
                StmtKind::VarDecl { kind, declarators } => {
                    let bk = if *kind == VarKind::Const {
                        BindingKind::Const
                    } else {
                        BindingKind::Mutable
                    };
                    for d in declarators {
                        declared.push((d.name.clone(), bk));
                    }
                }
                StmtKind::FuncDecl(func) => {
                    if let Some(name) = &func.name {
                        declared.push((name.clone(), BindingKind::Mutable));
                    }
                }
                _ => {}
            }
        }
        let path = self.module.as_ref().map(|m| m.path.clone()).unwrap_or_default();
        for (name, kind) in declared {
            let slot = self.heap.get_or_assign(&format!("{}#{}", path, name));
            if kind == BindingKind::Const {
                self.const_globals.insert(slot);
            }
            if let Some(module) = self.module.as_mut() {
                module.bindings.insert(name, slot);
            }
        }
        Ok(())
    }

    // Builder plumbing -----------------------------------------------------

    fn cur(&mut self) -> &mut FunctionBuilder {
        self.builders.last_mut().expect("builder stack is never empty")
    }

    fn emit(&mut self, op: Opcode, line: u32) -> usize {
        self.cur().chunk.emit(op, line)
    }

    fn alloc_reg(&mut self, line: u32) -> CResult<Reg> {
        let b = self.cur();
        if b.next_reg >= MAX_REGISTERS {
            return Err(Diagnostic::error(
                codes::COMPILE_LIMIT,
                DiagnosticKind::Compile,
                "function needs too many registers",
            )
            .with_span(core_types::Span::new(line, 1, 0, 0)));
        }
        let reg = b.next_reg as Reg;
        b.next_reg += 1;
        b.high_water = b.high_water.max(b.next_reg);
        Ok(reg)
    }

    fn reg_mark(&mut self) -> u16 {
        self.cur().next_reg
    }

    fn free_to(&mut self, mark: u16) {
        self.cur().next_reg = mark;
    }

    fn constant(&mut self, value: Constant) -> u16 {
        self.cur().chunk.add_constant(value)
    }

    fn name_constant(&mut self, name: &str) -> u16 {
        self.constant(Constant::String(name.to_string()))
    }

    fn reserve_ic(&mut self) -> u16 {
        self.cur().chunk.reserve_ic_slot()
    }

    fn emit_jump(&mut self, op: Opcode, line: u32) -> usize {
        self.emit(op, line)
    }

    fn patch_jump(&mut self, at: usize) -> CResult<()> {
        let target = self.cur().chunk.code.len();
        let offset = target as i64 - at as i64 - 1;
        let offset = i16::try_from(offset).map_err(|_| {
            Diagnostic::error(
                codes::COMPILE_LIMIT,
                DiagnosticKind::Compile,
                "jump distance exceeds chunk limits",
            )
        })?;
        match &mut self.cur().chunk.code[at] {
            Opcode::Jump { offset: o }
            | Opcode::JumpIfFalse { offset: o, .. }
            | Opcode::JumpIfTrue { offset: o, .. }
            | Opcode::JumpIfNullish { offset: o, .. }
            | Opcode::PushHandler { offset: o, .. } => *o = offset,
            other => panic!("patch_jump on non-jump {:?}", other),
        }
        Ok(())
    }

    fn emit_loop_back(&mut self, loop_start: usize, line: u32) -> CResult<()> {
        let offset = loop_start as i64 - self.cur().chunk.code.len() as i64 - 1;
        let offset = i16::try_from(offset).map_err(|_| {
            Diagnostic::error(
                codes::COMPILE_LIMIT,
                DiagnosticKind::Compile,
                "loop body exceeds chunk limits",
            )
        })?;
        self.emit(Opcode::Jump { offset }, line);
        Ok(())
    }

    // Scopes and bindings --------------------------------------------------

    fn begin_scope(&mut self) {
        self.cur().scope_depth += 1;
    }

    fn end_scope(&mut self, line: u32) {
        let b = self.cur();
        b.scope_depth -= 1;
        let depth = b.scope_depth;
        let mut lowest: Option<Reg> = None;
        let mut lowest_captured: Option<Reg> = None;
        while let Some(local) = b.locals.last() {
            if local.depth <= depth {
                break;
            }
            lowest = Some(local.reg);
            if local.captured {
                lowest_captured = Some(local.reg);
            }
            b.locals.pop();
        }
        if let Some(reg) = lowest {
            b.next_reg = reg as u16;
        }
        if let Some(from) = lowest_captured {
            self.emit(Opcode::CloseUpvalues { from }, line);
        }
    }

    fn declare_local(&mut self, name: &str, kind: BindingKind, line: u32) -> CResult<Reg> {
        let reg = self.alloc_reg(line)?;
        let b = self.cur();
        b.locals.push(Local {
            name: name.to_string(),
            reg,
            depth: b.scope_depth,
            kind,
            captured: false,
        });
        Ok(reg)
    }

    fn at_top_level(&self) -> bool {
        self.builders.len() == 1
            && self.builders[0].scope_depth == 0
            && !self.wrap_completion_next
    }

    fn find_local(builder: &FunctionBuilder, name: &str) -> Option<usize> {
        builder.locals.iter().rposition(|l| l.name == name)
    }

    fn add_upvalue(&mut self, level: usize, desc: UpvalueDesc, name: &str) -> u8 {
        let builder = &mut self.builders[level];
        if let Some(existing) = builder.upvalues.iter().position(|(d, _)| *d == desc) {
            return existing as u8;
        }
        builder.upvalues.push((desc, name.to_string()));
        (builder.upvalues.len() - 1) as u8
    }

    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<u8> {
        if level == 0 {
            return None;
        }
        if let Some(idx) = Self::find_local(&self.builders[level - 1], name) {
            let reg = self.builders[level - 1].locals[idx].reg;
            self.builders[level - 1].locals[idx].captured = true;
            return Some(self.add_upvalue(level, UpvalueDesc::new(true, reg), name));
        }
        let parent = self.resolve_upvalue(level - 1, name)?;
        Some(self.add_upvalue(level, UpvalueDesc::new(false, parent), name))
    }

    fn resolve(&mut self, name: &str) -> Binding {
        let top = self.builders.len() - 1;
        if let Some(idx) = Self::find_local(&self.builders[top], name) {
            let local = &self.builders[top].locals[idx];
            return Binding::Local(local.reg, local.kind);
        }
        if let Some(up) = self.resolve_upvalue(top, name) {
            return Binding::Upvalue(up);
        }
        if let Some(module) = &self.module {
            if let Some(&slot) = module.bindings.get(name) {
                let kind = if self.const_globals.contains(&slot) {
                    BindingKind::Const
                } else {
                    BindingKind::Mutable
                };
                return Binding::Global(slot, kind);
            }
            if let Some(&slot) = module.imports.get(name) {
                return Binding::Global(slot, BindingKind::Const);
            }
        }
        let slot = self.heap.get_or_assign(name);
        let kind = if self.const_globals.contains(&slot) {
            BindingKind::Const
        } else {
            BindingKind::Mutable
        };
        Binding::Global(slot, kind)
    }

    /// Global slot for a top-level declaration (mangled in module mode).
    fn top_level_slot(&mut self, name: &str, kind: BindingKind) -> u16 {
        let slot = match &self.module {
            Some(module) => {
                let mangled = format!("{}#{}", module.path, name);
                self.heap.get_or_assign(&mangled)
            }
            None => self.heap.get_or_assign(name),
        };
        if let Some(module) = self.module.as_mut() {
            module.bindings.insert(name.to_string(), slot);
        }
        if kind == BindingKind::Const {
            self.const_globals.insert(slot);
        }
        slot
    }

    fn finish_builder(&mut self) -> Chunk {
        let builder = self.builders.pop().expect("builder stack is never empty");
        let mut chunk = builder.chunk;
        chunk.register_count = builder.high_water.max(chunk.arity as u16 + 1);
        chunk
    }

    // Statements -----------------------------------------------------------

    fn statement(&mut self, stmt: &Stmt) -> CResult<()> {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Empty => Ok(()),
            StmtKind::VarDecl { kind, declarators } => {
                for d in declarators {
                    self.declarator(*kind, d, line)?;
                }
                Ok(())
            }
            StmtKind::FuncDecl(func) => {
                let name = func.name.clone().unwrap_or_default();
                if self.at_top_level() {
                    let slot = self.top_level_slot(&name, BindingKind::Mutable);
                    let mark = self.reg_mark();
                    let f = self.alloc_reg(line)?;
                    self.compile_function(func, f)?;
                    self.emit(Opcode::StoreGlobal { slot, src: f }, line);
                    self.free_to(mark);
                } else {
                    let reg = self.declare_local(&name, BindingKind::Mutable, line)?;
                    self.compile_function(func, reg)?;
                }
                Ok(())
            }
            StmtKind::Return(arg) => {
                match arg {
                    Some(expr) => {
                        let mark = self.reg_mark();
                        let src = self.expr_value(expr)?;
                        self.emit(Opcode::Return { src }, line);
                        self.free_to(mark);
                    }
                    None => {
                        self.emit(Opcode::ReturnUndefined, line);
                    }
                }
                Ok(())
            }
            StmtKind::ExprStmt(expr) => {
                let mark = self.reg_mark();
                let reg = self.expr_value(expr)?;
                if self.builders.len() == 1 && self.builders[0].track_completion {
                    if let Some(result) = self.builders[0].result_reg {
                        self.emit(Opcode::Move { dst: result, src: reg }, line);
                    }
                }
                self.free_to(mark);
                Ok(())
            }
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                let mark = self.reg_mark();
                let cond = self.expr_value(test)?;
                let to_else = self.emit_jump(
                    Opcode::JumpIfFalse {
                        cond,
                        offset: 0,
                    },
                    line,
                );
                self.free_to(mark);
                self.statement(consequent)?;
                if let Some(alternate) = alternate {
                    let to_end = self.emit_jump(Opcode::Jump { offset: 0 }, line);
                    self.patch_jump(to_else)?;
                    self.statement(alternate)?;
                    self.patch_jump(to_end)?;
                } else {
                    self.patch_jump(to_else)?;
                }
                Ok(())
            }
            StmtKind::While { test, body } => {
                let loop_start = self.cur().chunk.code.len();
                let mark = self.reg_mark();
                let cond = self.expr_value(test)?;
                let exit = self.emit_jump(Opcode::JumpIfFalse { cond, offset: 0 }, line);
                self.free_to(mark);
                self.cur().loops.push(LoopCtx::default());
                self.statement(body)?;
                let ctx = self.cur().loops.pop().unwrap_or_default();
                for at in ctx.continue_jumps {
                    let offset = loop_start as i64 - at as i64 - 1;
                    self.set_jump_offset(at, offset)?;
                }
                self.emit_loop_back(loop_start, line)?;
                self.patch_jump(exit)?;
                for at in ctx.break_jumps {
                    self.patch_jump(at)?;
                }
                Ok(())
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                self.begin_scope();
                if let Some(init) = init {
                    self.statement(init)?;
                }
                let loop_start = self.cur().chunk.code.len();
                let exit = match test {
                    Some(test) => {
                        let mark = self.reg_mark();
                        let cond = self.expr_value(test)?;
                        let at = self.emit_jump(Opcode::JumpIfFalse { cond, offset: 0 }, line);
                        self.free_to(mark);
                        Some(at)
                    }
                    None => None,
                };
                self.cur().loops.push(LoopCtx::default());
                self.statement(body)?;
                let ctx = self.cur().loops.pop().unwrap_or_default();
                let continue_target = self.cur().chunk.code.len();
                for at in ctx.continue_jumps {
                    let offset = continue_target as i64 - at as i64 - 1;
                    self.set_jump_offset(at, offset)?;
                }
                if let Some(update) = update {
                    let mark = self.reg_mark();
                    self.expr_value(update)?;
                    self.free_to(mark);
                }
                self.emit_loop_back(loop_start, line)?;
                if let Some(exit) = exit {
                    self.patch_jump(exit)?;
                }
                for at in ctx.break_jumps {
                    self.patch_jump(at)?;
                }
                self.end_scope(line);
                Ok(())
            }
            StmtKind::Block(body) => {
                self.begin_scope();
                for stmt in body {
                    self.statement(stmt)?;
                }
                self.end_scope(line);
                Ok(())
            }
            StmtKind::Throw(expr) => {
                let mark = self.reg_mark();
                let src = self.expr_value(expr)?;
                self.emit(Opcode::Throw { src }, line);
                self.free_to(mark);
                Ok(())
            }
            StmtKind::Try {
                block,
                catch_param,
                catch,
                finally,
            } => self.try_statement(block, catch_param, catch, finally, line),
            StmtKind::Break => {
                let at = self.emit_jump(Opcode::Jump { offset: 0 }, line);
                match self.cur().loops.last_mut() {
                    Some(ctx) => {
                        ctx.break_jumps.push(at);
                        Ok(())
                    }
                    None => Err(Diagnostic::error(
                        codes::COMPILE_UNSUPPORTED,
                        DiagnosticKind::Compile,
                        "'break' outside of a loop",
                    )
                    .with_span(stmt.span)),
                }
            }
            StmtKind::Continue => {
                let at = self.emit_jump(Opcode::Jump { offset: 0 }, line);
                match self.cur().loops.last_mut() {
                    Some(ctx) => {
                        ctx.continue_jumps.push(at);
                        Ok(())
                    }
                    None => Err(Diagnostic::error(
                        codes::COMPILE_UNSUPPORTED,
                        DiagnosticKind::Compile,
                        "'continue' outside of a loop",
                    )
                    .with_span(stmt.span)),
                }
            }
            StmtKind::Import(decl) => self.import_statement(decl, stmt),
            StmtKind::Export(decl) => self.export_statement(decl, stmt),
        }
    }

    fn set_jump_offset(&mut self, at: usize, offset: i64) -> CResult<()> {
        let offset = i16::try_from(offset).map_err(|_| {
            Diagnostic::error(
                codes::COMPILE_LIMIT,
                DiagnosticKind::Compile,
                "jump distance exceeds chunk limits",
            )
        })?;
        match &mut self.cur().chunk.code[at] {
            Opcode::Jump { offset: o }
            | Opcode::JumpIfFalse { offset: o, .. }
            | Opcode::JumpIfTrue { offset: o, .. }
            | Opcode::JumpIfNullish { offset: o, .. }
            | Opcode::PushHandler { offset: o, .. } => *o = offset,
            other => panic!("set_jump_offset on non-jump {:?}", other),
        }
        Ok(())
    }

    fn declarator(&mut self, kind: VarKind, d: &Declarator, line: u32) -> CResult<()> {
        let binding_kind = if kind == VarKind::Const {
            BindingKind::Const
        } else {
            BindingKind::Mutable
        };
        // `var` at the top level is function-scoped to the script/module
        // itself, wherever the declaration sits.
        if self.at_top_level() || (kind == VarKind::Var && self.builders.len() == 1) {
            let slot = self.top_level_slot(&d.name, binding_kind);
            let mark = self.reg_mark();
            let src = match &d.init {
                Some(init) => self.expr_value(init)?,
                None => {
                    let r = self.alloc_reg(line)?;
                    self.emit(Opcode::LoadUndefined { dst: r }, line);
                    r
                }
            };
            self.emit(Opcode::StoreGlobal { slot, src }, line);
            self.free_to(mark);
        } else if kind == VarKind::Var {
            // Assign to the binding hoisted at function entry.
            let reg = match Self::find_local(
                self.builders.last().expect("builder stack is never empty"),
                &d.name,
            ) {
                Some(index) => {
                    self.builders.last().expect("builder stack is never empty").locals[index].reg
                }
                None => self.declare_local(&d.name, BindingKind::Mutable, line)?,
            };
            if let Some(init) = &d.init {
                let mark = self.reg_mark();
                self.expr_into(init, reg)?;
                self.free_to(mark);
            }
        } else {
            // The register is allocated before the initializer compiles so
            // `const f = () => f()` can capture its own binding.
            let reg = self.declare_local(&d.name, binding_kind, line)?;
            match &d.init {
                Some(init) => self.expr_into(init, reg)?,
                None => {
                    self.emit(Opcode::LoadUndefined { dst: reg }, line);
                }
            }
        }
        Ok(())
    }

    fn try_statement(
        &mut self,
        block: &[Stmt],
        catch_param: &Option<String>,
        catch: &Option<Vec<Stmt>>,
        finally: &Option<Vec<Stmt>>,
        line: u32,
    ) -> CResult<()> {
        let compile_body = |this: &mut Self, body: &[Stmt]| -> CResult<()> {
            this.begin_scope();
            for stmt in body {
                this.statement(stmt)?;
            }
            this.end_scope(line);
            Ok(())
        };

        match (catch, finally) {
            (Some(catch_body), None) => {
                let creg = self.alloc_reg(line)?;
                let push = self.emit_jump(Opcode::PushHandler { offset: 0, reg: creg }, line);
                compile_body(self, block)?;
                self.emit(Opcode::PopHandler, line);
                let to_end = self.emit_jump(Opcode::Jump { offset: 0 }, line);
                self.patch_jump(push)?;
                self.begin_scope();
                if let Some(param) = catch_param {
                    let b = self.cur();
                    b.locals.push(Local {
                        name: param.clone(),
                        reg: creg,
                        depth: b.scope_depth,
                        kind: BindingKind::Mutable,
                        captured: false,
                    });
                }
                for stmt in catch_body {
                    self.statement(stmt)?;
                }
                self.end_scope(line);
                self.patch_jump(to_end)?;
                self.free_to(creg as u16);
                Ok(())
            }
            (None, Some(finally_body)) => {
                let treg = self.alloc_reg(line)?;
                let push = self.emit_jump(Opcode::PushHandler { offset: 0, reg: treg }, line);
                compile_body(self, block)?;
                self.emit(Opcode::PopHandler, line);
                compile_body(self, finally_body)?;
                let to_end = self.emit_jump(Opcode::Jump { offset: 0 }, line);
                self.patch_jump(push)?;
                compile_body(self, finally_body)?;
                self.emit(Opcode::Throw { src: treg }, line);
                self.patch_jump(to_end)?;
                self.free_to(treg as u16);
                Ok(())
            }
            (Some(catch_body), Some(finally_body)) => {
                let creg = self.alloc_reg(line)?;
                let treg = self.alloc_reg(line)?;
                let push = self.emit_jump(Opcode::PushHandler { offset: 0, reg: creg }, line);
                compile_body(self, block)?;
                self.emit(Opcode::PopHandler, line);
                compile_body(self, finally_body)?;
                let to_end = self.emit_jump(Opcode::Jump { offset: 0 }, line);

                self.patch_jump(push)?;
                let push_catch =
                    self.emit_jump(Opcode::PushHandler { offset: 0, reg: treg }, line);
                self.begin_scope();
                if let Some(param) = catch_param {
                    let b = self.cur();
                    b.locals.push(Local {
                        name: param.clone(),
                        reg: creg,
                        depth: b.scope_depth,
                        kind: BindingKind::Mutable,
                        captured: false,
                    });
                }
                for stmt in catch_body {
                    self.statement(stmt)?;
                }
                self.end_scope(line);
                self.emit(Opcode::PopHandler, line);
                compile_body(self, finally_body)?;
                let to_end2 = self.emit_jump(Opcode::Jump { offset: 0 }, line);

                self.patch_jump(push_catch)?;
                compile_body(self, finally_body)?;
                self.emit(Opcode::Throw { src: treg }, line);

                self.patch_jump(to_end)?;
                self.patch_jump(to_end2)?;
                self.free_to(creg as u16);
                Ok(())
            }
            (None, None) => unreachable!("parser requires catch or finally"),
        }
    }

    fn import_statement(&mut self, decl: &ImportDecl, stmt: &Stmt) -> CResult<()> {
        let Some(module) = &self.module else {
            return Err(Diagnostic::error(
                codes::COMPILE_UNSUPPORTED,
                DiagnosticKind::Compile,
                "import declarations require module mode",
            )
            .with_span(stmt.span));
        };
        let importer = module.path.clone();
        let resolver = module.resolver;
        let export_map = resolver
            .export_globals(&decl.specifier, &importer)
            .map_err(|d| {
                if d.span.is_none() {
                    d.with_span(stmt.span)
                } else {
                    d
                }
            })?;

        let mut bind = |imported: &str, local: &str| -> CResult<u16> {
            match export_map.get(imported) {
                Some(&slot) => Ok(slot),
                None => Err(Diagnostic::error(
                    codes::COMPILE_UNRESOLVED_IMPORT,
                    DiagnosticKind::Compile,
                    format!(
                        "module {:?} does not export {:?} (imported as {:?})",
                        decl.specifier, imported, local
                    ),
                )
                .with_span(stmt.span)),
            }
        };
        let mut bindings = Vec::new();
        if let Some(local) = &decl.default {
            bindings.push((local.clone(), bind("default", local)?));
        }
        for (imported, local) in &decl.named {
            bindings.push((local.clone(), bind(imported, local)?));
        }
        if let Some(module) = self.module.as_mut() {
            for (local, slot) in bindings {
                module.imports.insert(local, slot);
            }
        }
        Ok(())
    }

    fn export_statement(&mut self, decl: &ExportDecl, stmt: &Stmt) -> CResult<()> {
        if self.module.is_none() {
            return Err(Diagnostic::error(
                codes::COMPILE_UNSUPPORTED,
                DiagnosticKind::Compile,
                "export declarations require module mode",
            )
            .with_span(stmt.span));
        }
        match decl {
            ExportDecl::Decl(inner) => {
                let names: Vec<String> = match &inner.kind {
                    StmtKind::VarDecl { declarators, .. } => {
                        declarators.iter().map(|d| d.name.clone()).collect()
                    }
                    StmtKind::FuncDecl(func) => func.name.clone().into_iter().collect(),
                    _ => Vec::new(),
                };
                self.statement(inner)?;
                for name in names {
                    let slot = self
                        .module
                        .as_ref()
                        .and_then(|m| m.bindings.get(&name).copied())
                        .ok_or_else(|| {
                            Diagnostic::error(
                                codes::COMPILE_UNSUPPORTED,
                                DiagnosticKind::Compile,
                                format!("cannot export non-top-level binding {:?}", name),
                            )
                            .with_span(stmt.span)
                        })?;
                    if let Some(module) = self.module.as_mut() {
                        module.exports.push((name, slot));
                    }
                }
                Ok(())
            }
            ExportDecl::List(names) => {
                for (local, exported) in names {
                    let slot = self
                        .module
                        .as_ref()
                        .and_then(|m| m.bindings.get(local).copied())
                        .ok_or_else(|| {
                            Diagnostic::error(
                                codes::COMPILE_UNSUPPORTED,
                                DiagnosticKind::Compile,
                                format!("cannot export undeclared binding {:?}", local),
                            )
                            .with_span(stmt.span)
                        })?;
                    if let Some(module) = self.module.as_mut() {
                        module.exports.push((exported.clone(), slot));
                    }
                }
                Ok(())
            }
            ExportDecl::Default(expr) => {
                let path = self.module.as_ref().map(|m| m.path.clone()).unwrap_or_default();
                let slot = self.heap.get_or_assign(&format!("{}#default", path));
                let mark = self.reg_mark();
                let src = self.expr_value(expr)?;
                self.emit(Opcode::StoreGlobal { slot, src }, stmt.line);
                self.free_to(mark);
                if let Some(module) = self.module.as_mut() {
                    module.exports.push(("default".to_string(), slot));
                }
                Ok(())
            }
        }
    }

    // Functions ------------------------------------------------------------

    fn compile_function(&mut self, func: &Function, dst: Reg) -> CResult<()> {
        let rest = func.params.iter().any(|p| p.rest);
        let arity = func.params.iter().filter(|p| !p.rest).count();
        if arity + rest as usize > u8::MAX as usize {
            return Err(Diagnostic::error(
                codes::COMPILE_LIMIT,
                DiagnosticKind::Compile,
                "too many parameters",
            ));
        }
        let mut builder =
            FunctionBuilder::new(func.name.clone(), arity as u8, rest, func.is_async);
        if self.wrap_completion_next {
            builder.track_completion = true;
            self.wrap_completion_next = false;
        }
        builder.scope_depth = 1;
        self.builders.push(builder);

        for param in &func.params {
            self.declare_local(&param.name, BindingKind::Mutable, func.line)?;
        }
        // `var` hoists to function scope: its bindings exist (undefined)
        // from function entry, wherever the declaration sits.
        let mut hoisted = Vec::new();
        collect_var_names(&func.body, &mut hoisted);
        for name in hoisted {
            if Self::find_local(self.builders.last().expect("builder"), &name).is_none() {
                let reg = self.declare_local(&name, BindingKind::Mutable, func.line)?;
                self.emit(Opcode::LoadUndefined { dst: reg }, func.line);
            }
        }
        let result = if self.cur().track_completion {
            let r = self.alloc_reg(func.line)?;
            self.cur().result_reg = Some(r);
            self.emit(Opcode::LoadUndefined { dst: r }, func.line);
            Some(r)
        } else {
            None
        };
        for stmt in &func.body {
            self.statement_in_function(stmt)?;
        }
        match result {
            Some(r) => {
                self.emit(Opcode::Return { src: r }, func.line);
            }
            None => {
                self.emit(Opcode::ReturnUndefined, func.line);
            }
        }

        let upvalues: Vec<UpvalueDesc> = self
            .builders
            .last()
            .map(|b| b.upvalues.iter().map(|(d, _)| *d).collect())
            .unwrap_or_default();
        let chunk = self.finish_builder();
        let fidx = self.cur().chunk.add_function(Arc::new(chunk));
        self.emit(
            Opcode::MakeClosure {
                dst,
                func: fidx,
                upvalues,
            },
            func.line,
        );
        Ok(())
    }

    /// Statements inside a function body: completion tracking follows the
    /// builder's own flag (used by the top-level-await wrapper).
    fn statement_in_function(&mut self, stmt: &Stmt) -> CResult<()> {
        if self.cur().track_completion {
            if let StmtKind::ExprStmt(expr) = &stmt.kind {
                let line = stmt.line;
                let mark = self.reg_mark();
                let reg = self.expr_value(expr)?;
                if let Some(result) = self.cur().result_reg {
                    self.emit(Opcode::Move { dst: result, src: reg }, line);
                }
                self.free_to(mark);
                return Ok(());
            }
        }
        self.statement(stmt)
    }

    // Expressions ----------------------------------------------------------

    /// Compiles `expr`, returning the register holding its value. The result
    /// may alias a local; callers that store through it use [`expr_into`].
    ///
    /// [`expr_into`]: Compiler::expr_into
    fn expr_value(&mut self, expr: &Expr) -> CResult<Reg> {
        if let ExprKind::Ident(name) = &expr.kind {
            if let Binding::Local(reg, _) = self.resolve(name) {
                return Ok(reg);
            }
        }
        let dst = self.alloc_reg(expr.line)?;
        self.expr_into(expr, dst)?;
        Ok(dst)
    }

    /// Compiles `expr` into exactly `dst`.
    fn expr_into(&mut self, expr: &Expr, dst: Reg) -> CResult<()> {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Number(n) => {
                let constant = if n.fract() == 0.0
                    && *n >= i32::MIN as f64
                    && *n <= i32::MAX as f64
                    && !(*n == 0.0 && n.is_sign_negative())
                {
                    Constant::Int(*n as i32)
                } else {
                    Constant::Number(*n)
                };
                let idx = self.constant(constant);
                self.emit(Opcode::LoadConst { dst, idx }, line);
            }
            ExprKind::BigInt(digits) => {
                let value = BigInt::from_str(digits).map_err(|_| {
                    Diagnostic::error(
                        codes::SYNTAX_BAD_LITERAL,
                        DiagnosticKind::Syntax,
                        format!("invalid bigint literal {:?}", digits),
                    )
                })?;
                let idx = self.constant(Constant::BigInt(value));
                self.emit(Opcode::LoadConst { dst, idx }, line);
            }
            ExprKind::String(s) => {
                let idx = self.constant(Constant::String(s.clone()));
                self.emit(Opcode::LoadConst { dst, idx }, line);
            }
            ExprKind::Bool(b) => {
                self.emit(Opcode::LoadBool { dst, value: *b }, line);
            }
            ExprKind::Null => {
                self.emit(Opcode::LoadNull { dst }, line);
            }
            ExprKind::Undefined => {
                self.emit(Opcode::LoadUndefined { dst }, line);
            }
            ExprKind::This => {
                self.emit(Opcode::LoadThis { dst }, line);
            }
            ExprKind::Ident(name) => match self.resolve(name) {
                Binding::Local(reg, _) => {
                    if reg != dst {
                        self.emit(Opcode::Move { dst, src: reg }, line);
                    }
                }
                Binding::Upvalue(idx) => {
                    self.emit(Opcode::GetUpvalue { dst, idx }, line);
                }
                Binding::Global(slot, _) => {
                    self.emit(Opcode::LoadGlobal { dst, slot }, line);
                }
            },
            ExprKind::Array(items) => {
                if items.len() > u8::MAX as usize {
                    return Err(Diagnostic::error(
                        codes::COMPILE_LIMIT,
                        DiagnosticKind::Compile,
                        "array literal has too many elements",
                    ));
                }
                let mark = self.reg_mark();
                let start = self.cur().next_reg as Reg;
                for item in items {
                    let r = self.alloc_reg(line)?;
                    self.expr_into(item, r)?;
                }
                self.emit(
                    Opcode::NewArray {
                        dst,
                        start,
                        count: items.len() as u8,
                    },
                    line,
                );
                self.free_to(mark);
            }
            ExprKind::Object(props) => {
                self.emit(Opcode::NewObject { dst }, line);
                for prop in props {
                    let name = self.name_constant(&prop.key);
                    match &prop.value {
                        ObjPropValue::Value(value) => {
                            let mark = self.reg_mark();
                            let src = self.expr_value(value)?;
                            let ic = self.reserve_ic();
                            self.emit(
                                Opcode::SetProp {
                                    obj: dst,
                                    name,
                                    src,
                                    ic,
                                },
                                line,
                            );
                            self.free_to(mark);
                        }
                        ObjPropValue::Getter(func) => {
                            let mark = self.reg_mark();
                            let getter = self.alloc_reg(line)?;
                            self.compile_function(func, getter)?;
                            let none = self.alloc_reg(line)?;
                            self.emit(Opcode::LoadUndefined { dst: none }, line);
                            self.emit(
                                Opcode::DefineAccessor {
                                    obj: dst,
                                    name,
                                    getter,
                                    setter: none,
                                },
                                line,
                            );
                            self.free_to(mark);
                        }
                        ObjPropValue::Setter(func) => {
                            let mark = self.reg_mark();
                            let none = self.alloc_reg(line)?;
                            self.emit(Opcode::LoadUndefined { dst: none }, line);
                            let setter = self.alloc_reg(line)?;
                            self.compile_function(func, setter)?;
                            self.emit(
                                Opcode::DefineAccessor {
                                    obj: dst,
                                    name,
                                    getter: none,
                                    setter,
                                },
                                line,
                            );
                            self.free_to(mark);
                        }
                    }
                }
            }
            ExprKind::Func(func) => {
                self.compile_function(func, dst)?;
            }
            ExprKind::Unary { op, expr: operand } => {
                let mark = self.reg_mark();
                match op {
                    UnaryOp::Neg => {
                        let src = self.expr_value(operand)?;
                        self.emit(Opcode::Neg { dst, src }, line);
                    }
                    UnaryOp::Not => {
                        let src = self.expr_value(operand)?;
                        self.emit(Opcode::Not { dst, src }, line);
                    }
                    UnaryOp::BitNot => {
                        let src = self.expr_value(operand)?;
                        self.emit(Opcode::BitNot { dst, src }, line);
                    }
                    UnaryOp::TypeOf => {
                        let src = self.expr_value(operand)?;
                        self.emit(Opcode::TypeOf { dst, src }, line);
                    }
                    UnaryOp::Plus => {
                        // `+x` is ToNumber: `x - 0` avoids Add's string
                        // concatenation path.
                        let src = self.expr_value(operand)?;
                        let zero = self.alloc_reg(line)?;
                        let idx = self.constant(Constant::Int(0));
                        self.emit(Opcode::LoadConst { dst: zero, idx }, line);
                        self.emit(
                            Opcode::Sub {
                                dst,
                                lhs: src,
                                rhs: zero,
                            },
                            line,
                        );
                    }
                }
                self.free_to(mark);
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let mark = self.reg_mark();
                let l = self.expr_value(lhs)?;
                let r = self.expr_value(rhs)?;
                let opcode = match op {
                    BinaryOp::Add => Opcode::Add { dst, lhs: l, rhs: r },
                    BinaryOp::Sub => Opcode::Sub { dst, lhs: l, rhs: r },
                    BinaryOp::Mul => Opcode::Mul { dst, lhs: l, rhs: r },
                    BinaryOp::Div => Opcode::Div { dst, lhs: l, rhs: r },
                    BinaryOp::Rem => Opcode::Rem { dst, lhs: l, rhs: r },
                    BinaryOp::Pow => Opcode::Pow { dst, lhs: l, rhs: r },
                    BinaryOp::BitAnd => Opcode::BitAnd { dst, lhs: l, rhs: r },
                    BinaryOp::BitOr => Opcode::BitOr { dst, lhs: l, rhs: r },
                    BinaryOp::BitXor => Opcode::BitXor { dst, lhs: l, rhs: r },
                    BinaryOp::Shl => Opcode::Shl { dst, lhs: l, rhs: r },
                    BinaryOp::Shr => Opcode::Shr { dst, lhs: l, rhs: r },
                    BinaryOp::UShr => Opcode::UShr { dst, lhs: l, rhs: r },
                    BinaryOp::Eq => Opcode::Eq { dst, lhs: l, rhs: r },
                    BinaryOp::Ne => Opcode::Ne { dst, lhs: l, rhs: r },
                    BinaryOp::StrictEq => Opcode::StrictEq { dst, lhs: l, rhs: r },
                    BinaryOp::StrictNe => Opcode::StrictNe { dst, lhs: l, rhs: r },
                    BinaryOp::Lt => Opcode::Lt { dst, lhs: l, rhs: r },
                    BinaryOp::Le => Opcode::Le { dst, lhs: l, rhs: r },
                    BinaryOp::Gt => Opcode::Gt { dst, lhs: l, rhs: r },
                    BinaryOp::Ge => Opcode::Ge { dst, lhs: l, rhs: r },
                };
                self.emit(opcode, line);
                self.free_to(mark);
            }
            ExprKind::Logical { op, lhs, rhs } => {
                self.expr_into(lhs, dst)?;
                let jump = match op {
                    LogicalOp::And => {
                        self.emit_jump(Opcode::JumpIfFalse { cond: dst, offset: 0 }, line)
                    }
                    LogicalOp::Or => {
                        self.emit_jump(Opcode::JumpIfTrue { cond: dst, offset: 0 }, line)
                    }
                    LogicalOp::Nullish => {
                        let to_rhs =
                            self.emit_jump(Opcode::JumpIfNullish { cond: dst, offset: 0 }, line);
                        let to_end = self.emit_jump(Opcode::Jump { offset: 0 }, line);
                        self.patch_jump(to_rhs)?;
                        self.expr_into(rhs, dst)?;
                        self.patch_jump(to_end)?;
                        return Ok(());
                    }
                };
                self.expr_into(rhs, dst)?;
                self.patch_jump(jump)?;
            }
            ExprKind::Assign { target, op, value } => {
                self.assign(target, op.as_ref(), value, dst, line)?;
            }
            ExprKind::Update {
                target,
                inc,
                prefix,
            } => {
                self.update(target, *inc, *prefix, dst, line)?;
            }
            ExprKind::Cond { test, cons, alt } => {
                let mark = self.reg_mark();
                let cond = self.expr_value(test)?;
                let to_alt = self.emit_jump(Opcode::JumpIfFalse { cond, offset: 0 }, line);
                self.free_to(mark);
                self.expr_into(cons, dst)?;
                let to_end = self.emit_jump(Opcode::Jump { offset: 0 }, line);
                self.patch_jump(to_alt)?;
                self.expr_into(alt, dst)?;
                self.patch_jump(to_end)?;
            }
            ExprKind::Call { callee, args } => {
                self.call(callee, args, dst, line)?;
            }
            ExprKind::New { callee, args } => {
                // Construction dispatches on the callee kind at runtime;
                // the call shape is identical.
                self.plain_call(callee, args, dst, line)?;
            }
            ExprKind::Member { obj, prop } => {
                let mark = self.reg_mark();
                let o = self.expr_value(obj)?;
                let name = self.name_constant(prop);
                let ic = self.reserve_ic();
                self.emit(Opcode::GetProp { dst, obj: o, name, ic }, line);
                self.free_to(mark);
            }
            ExprKind::Index { obj, index } => {
                let mark = self.reg_mark();
                let o = self.expr_value(obj)?;
                let i = self.expr_value(index)?;
                let ic = self.reserve_ic();
                self.emit(Opcode::GetIndex { dst, obj: o, idx: i, ic }, line);
                self.free_to(mark);
            }
            ExprKind::Await(inner) => {
                if !self.cur().is_async {
                    return Err(Diagnostic::error(
                        codes::COMPILE_UNSUPPORTED,
                        DiagnosticKind::Compile,
                        "'await' outside of an async function",
                    ));
                }
                let mark = self.reg_mark();
                let src = self.expr_value(inner)?;
                self.emit(Opcode::Await { dst, src }, line);
                self.free_to(mark);
            }
            ExprKind::Delete(target) => match &target.kind {
                ExprKind::Member { obj, prop } => {
                    let mark = self.reg_mark();
                    let o = self.expr_value(obj)?;
                    let name = self.name_constant(prop);
                    self.emit(Opcode::DeleteProp { dst, obj: o, name }, line);
                    self.free_to(mark);
                }
                ExprKind::Index { obj, index } => {
                    if let ExprKind::String(key) = &index.kind {
                        let mark = self.reg_mark();
                        let o = self.expr_value(obj)?;
                        let name = self.name_constant(key);
                        self.emit(Opcode::DeleteProp { dst, obj: o, name }, line);
                        self.free_to(mark);
                    } else {
                        return Err(Diagnostic::error(
                            codes::COMPILE_UNSUPPORTED,
                            DiagnosticKind::Compile,
                            "delete with a computed key is not supported",
                        ));
                    }
                }
                _ => {
                    // `delete` on a non-reference evaluates to true.
                    self.emit(Opcode::LoadBool { dst, value: true }, line);
                }
            },
        }
        Ok(())
    }

    fn assign(
        &mut self,
        target: &AssignTarget,
        op: Option<&BinaryOp>,
        value: &Expr,
        dst: Reg,
        line: u32,
    ) -> CResult<()> {
        match target {
            AssignTarget::Ident(name) => match self.resolve(name) {
                Binding::Local(reg, kind) => {
                    if kind == BindingKind::Const {
                        return Err(self.const_error(name, line));
                    }
                    match op {
                        None => self.expr_into(value, reg)?,
                        Some(op) => {
                            let mark = self.reg_mark();
                            let rhs = self.expr_value(value)?;
                            self.emit(binary_opcode(*op, reg, reg, rhs), line);
                            self.free_to(mark);
                        }
                    }
                    if dst != reg {
                        self.emit(Opcode::Move { dst, src: reg }, line);
                    }
                }
                Binding::Upvalue(idx) => {
                    match op {
                        None => self.expr_into(value, dst)?,
                        Some(op) => {
                            let mark = self.reg_mark();
                            self.emit(Opcode::GetUpvalue { dst, idx }, line);
                            let rhs = self.expr_value(value)?;
                            self.emit(binary_opcode(*op, dst, dst, rhs), line);
                            self.free_to(mark);
                        }
                    }
                    self.emit(Opcode::SetUpvalue { idx, src: dst }, line);
                }
                Binding::Global(slot, kind) => {
                    if kind == BindingKind::Const {
                        return Err(self.const_error(name, line));
                    }
                    match op {
                        None => self.expr_into(value, dst)?,
                        Some(op) => {
                            let mark = self.reg_mark();
                            self.emit(Opcode::LoadGlobal { dst, slot }, line);
                            let rhs = self.expr_value(value)?;
                            self.emit(binary_opcode(*op, dst, dst, rhs), line);
                            self.free_to(mark);
                        }
                    }
                    self.emit(Opcode::StoreGlobal { slot, src: dst }, line);
                }
            },
            AssignTarget::Member { obj, prop } => {
                let mark = self.reg_mark();
                let o = self.expr_value(obj)?;
                let name = self.name_constant(prop);
                match op {
                    None => self.expr_into(value, dst)?,
                    Some(op) => {
                        let ic = self.reserve_ic();
                        self.emit(Opcode::GetProp { dst, obj: o, name, ic }, line);
                        let rhs = self.expr_value(value)?;
                        self.emit(binary_opcode(*op, dst, dst, rhs), line);
                    }
                }
                let ic = self.reserve_ic();
                self.emit(
                    Opcode::SetProp {
                        obj: o,
                        name,
                        src: dst,
                        ic,
                    },
                    line,
                );
                self.free_to(mark);
            }
            AssignTarget::Index { obj, index } => {
                let mark = self.reg_mark();
                let o = self.expr_value(obj)?;
                let i = self.expr_value(index)?;
                match op {
                    None => self.expr_into(value, dst)?,
                    Some(op) => {
                        let ic = self.reserve_ic();
                        self.emit(Opcode::GetIndex { dst, obj: o, idx: i, ic }, line);
                        let rhs = self.expr_value(value)?;
                        self.emit(binary_opcode(*op, dst, dst, rhs), line);
                    }
                }
                let ic = self.reserve_ic();
                self.emit(
                    Opcode::SetIndex {
                        obj: o,
                        idx: i,
                        src: dst,
                        ic,
                    },
                    line,
                );
                self.free_to(mark);
            }
        }
        Ok(())
    }

    fn update(
        &mut self,
        target: &AssignTarget,
        inc: bool,
        prefix: bool,
        dst: Reg,
        line: u32,
    ) -> CResult<()> {
        enum WriteBack {
            Local(Reg),
            Upvalue(u8),
            Global(u16),
            Member { obj: Reg, name: u16, ic: u16 },
            Index { obj: Reg, idx: Reg, ic: u16 },
        }

        // Lowered as read → ±1 → write; `dst` gets the pre- or post-value.
        let mark = self.reg_mark();
        let current = self.alloc_reg(line)?;
        let one = self.alloc_reg(line)?;
        let updated = self.alloc_reg(line)?;
        let idx = self.constant(Constant::Int(1));

        let write_back = match target {
            AssignTarget::Ident(name) => match self.resolve(name) {
                Binding::Local(reg, kind) => {
                    if kind == BindingKind::Const {
                        return Err(self.const_error(name, line));
                    }
                    self.emit(Opcode::Move { dst: current, src: reg }, line);
                    WriteBack::Local(reg)
                }
                Binding::Upvalue(up) => {
                    self.emit(Opcode::GetUpvalue { dst: current, idx: up }, line);
                    WriteBack::Upvalue(up)
                }
                Binding::Global(slot, kind) => {
                    if kind == BindingKind::Const {
                        return Err(self.const_error(name, line));
                    }
                    self.emit(Opcode::LoadGlobal { dst: current, slot }, line);
                    WriteBack::Global(slot)
                }
            },
            AssignTarget::Member { obj, prop } => {
                let o = self.expr_value(obj)?;
                let name = self.name_constant(prop);
                let ic = self.reserve_ic();
                self.emit(Opcode::GetProp { dst: current, obj: o, name, ic }, line);
                let ic_store = self.reserve_ic();
                WriteBack::Member {
                    obj: o,
                    name,
                    ic: ic_store,
                }
            }
            AssignTarget::Index { obj, index } => {
                let o = self.expr_value(obj)?;
                let i = self.expr_value(index)?;
                let ic = self.reserve_ic();
                self.emit(Opcode::GetIndex { dst: current, obj: o, idx: i, ic }, line);
                let ic_store = self.reserve_ic();
                WriteBack::Index {
                    obj: o,
                    idx: i,
                    ic: ic_store,
                }
            }
        };

        // ToNumber on the old value so postfix returns a number.
        self.emit(Opcode::LoadConst { dst: one, idx }, line);
        self.emit(
            Opcode::Sub {
                dst: current,
                lhs: current,
                rhs: one,
            },
            line,
        );
        self.emit(
            Opcode::Add {
                dst: current,
                lhs: current,
                rhs: one,
            },
            line,
        );
        let opcode = if inc {
            Opcode::Add {
                dst: updated,
                lhs: current,
                rhs: one,
            }
        } else {
            Opcode::Sub {
                dst: updated,
                lhs: current,
                rhs: one,
            }
        };
        self.emit(opcode, line);
        match write_back {
            WriteBack::Local(reg) => {
                self.emit(Opcode::Move { dst: reg, src: updated }, line);
            }
            WriteBack::Upvalue(up) => {
                self.emit(Opcode::SetUpvalue { idx: up, src: updated }, line);
            }
            WriteBack::Global(slot) => {
                self.emit(Opcode::StoreGlobal { slot, src: updated }, line);
            }
            WriteBack::Member { obj, name, ic } => {
                self.emit(
                    Opcode::SetProp {
                        obj,
                        name,
                        src: updated,
                        ic,
                    },
                    line,
                );
            }
            WriteBack::Index { obj, idx, ic } => {
                self.emit(
                    Opcode::SetIndex {
                        obj,
                        idx,
                        src: updated,
                        ic,
                    },
                    line,
                );
            }
        }
        let result = if prefix { updated } else { current };
        self.emit(Opcode::Move { dst, src: result }, line);
        self.free_to(mark);
        Ok(())
    }

    fn const_error(&self, name: &str, line: u32) -> Diagnostic {
        Diagnostic::error(
            codes::COMPILE_CONST_ASSIGN,
            DiagnosticKind::Compile,
            format!("assignment to constant {:?}", name),
        )
        .with_span(core_types::Span::new(line, 1, 0, 0))
    }

    fn call(&mut self, callee: &Expr, args: &[Expr], dst: Reg, line: u32) -> CResult<()> {
        if let ExprKind::Member { obj, prop } = &callee.kind {
            // Method call: receiver plus arguments in consecutive registers.
            let mark = self.reg_mark();
            let recv = self.alloc_reg(line)?;
            self.expr_into(obj, recv)?;
            for arg in args {
                let r = self.alloc_reg(line)?;
                self.expr_into(arg, r)?;
            }
            let name = self.name_constant(prop);
            let ic = self.reserve_ic();
            self.emit(
                Opcode::CallMethod {
                    dst,
                    recv,
                    name,
                    argc: args.len() as u8,
                    ic,
                },
                line,
            );
            self.free_to(mark);
            return Ok(());
        }
        self.plain_call(callee, args, dst, line)
    }

    fn plain_call(&mut self, callee: &Expr, args: &[Expr], dst: Reg, line: u32) -> CResult<()> {
        if args.len() > u8::MAX as usize {
            return Err(Diagnostic::error(
                codes::COMPILE_LIMIT,
                DiagnosticKind::Compile,
                "too many call arguments",
            ));
        }
        let mark = self.reg_mark();
        let f = self.alloc_reg(line)?;
        self.expr_into(callee, f)?;
        for arg in args {
            let r = self.alloc_reg(line)?;
            self.expr_into(arg, r)?;
        }
        self.emit(
            Opcode::Call {
                dst,
                callee: f,
                argc: args.len() as u8,
            },
            line,
        );
        self.free_to(mark);
        Ok(())
    }
}

fn binary_opcode(op: BinaryOp, dst: Reg, lhs: Reg, rhs: Reg) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add { dst, lhs, rhs },
        BinaryOp::Sub => Opcode::Sub { dst, lhs, rhs },
        BinaryOp::Mul => Opcode::Mul { dst, lhs, rhs },
        BinaryOp::Div => Opcode::Div { dst, lhs, rhs },
        BinaryOp::Rem => Opcode::Rem { dst, lhs, rhs },
        BinaryOp::Pow => Opcode::Pow { dst, lhs, rhs },
        BinaryOp::BitAnd => Opcode::BitAnd { dst, lhs, rhs },
        BinaryOp::BitOr => Opcode::BitOr { dst, lhs, rhs },
        BinaryOp::BitXor => Opcode::BitXor { dst, lhs, rhs },
        BinaryOp::Shl => Opcode::Shl { dst, lhs, rhs },
        BinaryOp::Shr => Opcode::Shr { dst, lhs, rhs },
        BinaryOp::UShr => Opcode::UShr { dst, lhs, rhs },
        BinaryOp::Eq => Opcode::Eq { dst, lhs, rhs },
        BinaryOp::Ne => Opcode::Ne { dst, lhs, rhs },
        BinaryOp::StrictEq => Opcode::StrictEq { dst, lhs, rhs },
        BinaryOp::StrictNe => Opcode::StrictNe { dst, lhs, rhs },
        BinaryOp::Lt => Opcode::Lt { dst, lhs, rhs },
        BinaryOp::Le => Opcode::Le { dst, lhs, rhs },
        BinaryOp::Gt => Opcode::Gt { dst, lhs, rhs },
        BinaryOp::Ge => Opcode::Ge { dst, lhs, rhs },
    }
}

fn last_line(program: &Program) -> u32 {
    program.body.last().map(|s| s.line).unwrap_or(1)
}

/// Collects `var` names declared anywhere in a function body, without
/// descending into nested function bodies.
fn collect_var_names(body: &[Stmt], out: &mut Vec<String>) {
    for stmt in body {
        collect_var_stmt(stmt, out);
    }
}

fn collect_var_stmt(stmt: &Stmt, out: &mut Vec<String>) {
    match &stmt.kind {
        StmtKind::VarDecl {
            kind: VarKind::Var,
            declarators,
        } => {
            out.extend(declarators.iter().map(|d| d.name.clone()));
        }
        StmtKind::If {
            consequent,
            alternate,
            ..
        } => {
            collect_var_stmt(consequent, out);
            if let Some(alternate) = alternate {
                collect_var_stmt(alternate, out);
            }
        }
        StmtKind::While { body, .. } => collect_var_stmt(body, out),
        StmtKind::For { init, body, .. } => {
            if let Some(init) = init {
                collect_var_stmt(init, out);
            }
            collect_var_stmt(body, out);
        }
        StmtKind::Block(body) => collect_var_names(body, out),
        StmtKind::Try {
            block,
            catch,
            finally,
            ..
        } => {
            collect_var_names(block, out);
            if let Some(catch) = catch {
                collect_var_names(catch, out);
            }
            if let Some(finally) = finally {
                collect_var_names(finally, out);
            }
        }
        StmtKind::Export(ExportDecl::Decl(inner)) => collect_var_stmt(inner, out),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn compile(source: &str) -> Arc<Chunk> {
        let program = parse_program(source).expect("parse");
        let mut heap = HeapAllocator::new();
        Compiler::new(&mut heap)
            .compile_script(&program)
            .expect("compile")
    }

    #[test]
    fn test_compile_arithmetic() {
        let chunk = compile("let x = 1 + 2; x");
        assert!(chunk
            .code
            .iter()
            .any(|op| matches!(op, Opcode::Add { .. })));
        assert!(chunk
            .code
            .iter()
            .any(|op| matches!(op, Opcode::StoreGlobal { .. })));
        assert!(matches!(chunk.code.last(), Some(Opcode::Return { .. })));
    }

    #[test]
    fn test_globals_share_allocator() {
        let program_a = parse_program("let shared = 1;").expect("parse");
        let program_b = parse_program("shared + 1").expect("parse");
        let mut heap = HeapAllocator::new();
        Compiler::new(&mut heap)
            .compile_script(&program_a)
            .expect("compile a");
        Compiler::new(&mut heap)
            .compile_script(&program_b)
            .expect("compile b");
        assert_eq!(heap.lookup("shared"), Some(0));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_ic_slots_reserved_per_site() {
        let chunk = compile("let o = { a: 1 }; o.a; o.a; o.b;");
        // One slot for the literal store, three for the reads.
        assert_eq!(chunk.ic_slot_count, 4);
    }

    #[test]
    fn test_closure_upvalue_descriptors() {
        let chunk = compile("function outer() { let n = 1; return () => n; }");
        let outer = &chunk.functions[0];
        let inner_closure = outer
            .code
            .iter()
            .find_map(|op| match op {
                Opcode::MakeClosure { upvalues, .. } => Some(upvalues.clone()),
                _ => None,
            })
            .expect("inner MakeClosure");
        assert_eq!(inner_closure.len(), 1);
        assert!(inner_closure[0].is_local);
    }

    #[test]
    fn test_block_scope_closes_upvalues() {
        let chunk = compile("let fns = []; { let x = 1; fns.push(() => x); }");
        assert!(chunk
            .code
            .iter()
            .any(|op| matches!(op, Opcode::CloseUpvalues { .. })));
    }

    #[test]
    fn test_const_reassignment_rejected() {
        let program = parse_program("const x = 1; x = 2;").expect("parse");
        let mut heap = HeapAllocator::new();
        let err = Compiler::new(&mut heap)
            .compile_script(&program)
            .unwrap_err();
        assert_eq!(err.code, codes::COMPILE_CONST_ASSIGN);
    }

    #[test]
    fn test_await_outside_async_rejected() {
        let program = parse_program("function f() { return await g(); }").expect("parse");
        let mut heap = HeapAllocator::new();
        let err = Compiler::new(&mut heap)
            .compile_script(&program)
            .unwrap_err();
        assert_eq!(err.code, codes::COMPILE_UNSUPPORTED);
    }

    #[test]
    fn test_top_level_await_wraps_in_async_entry() {
        let chunk = compile("async function f() { return 1; } await f()");
        // The body lives in a nested async chunk called immediately.
        assert!(chunk.functions.iter().any(|f| f.is_async));
        assert!(chunk
            .code
            .iter()
            .any(|op| matches!(op, Opcode::Call { .. })));
    }

    #[test]
    fn test_module_exports_registered() {
        struct NoImports;
        impl ImportResolver for NoImports {
            fn export_globals(
                &self,
                _specifier: &str,
                _importer: &str,
            ) -> Result<HashMap<String, u16>, Diagnostic> {
                Ok(HashMap::new())
            }
        }
        let program = parse_program("export const x = 1; x + 1").expect("parse");
        let mut heap = HeapAllocator::new();
        let artifact = Compiler::new(&mut heap)
            .compile_module(&program, "/src/a.ts", &NoImports)
            .expect("compile");
        assert_eq!(artifact.exports.len(), 1);
        assert_eq!(artifact.exports[0].0, "x");
        assert_eq!(heap.lookup("/src/a.ts#x"), Some(artifact.exports[0].1));
    }

    #[test]
    fn test_module_import_binds_to_exporter_slot() {
        struct Fixed(u16);
        impl ImportResolver for Fixed {
            fn export_globals(
                &self,
                _specifier: &str,
                _importer: &str,
            ) -> Result<HashMap<String, u16>, Diagnostic> {
                Ok(HashMap::from([("x".to_string(), self.0)]))
            }
        }
        let program = parse_program("import { x } from \"./a\"; x + 1").expect("parse");
        let mut heap = HeapAllocator::new();
        heap.get_or_assign("/src/a.ts#x");
        let artifact = Compiler::new(&mut heap)
            .compile_module(&program, "/src/b.ts", &Fixed(0))
            .expect("compile");
        assert!(artifact
            .chunk
            .code
            .iter()
            .any(|op| matches!(op, Opcode::LoadGlobal { slot: 0, .. })));
    }

    #[test]
    fn test_missing_import_is_error() {
        struct NoExports;
        impl ImportResolver for NoExports {
            fn export_globals(
                &self,
                _specifier: &str,
                _importer: &str,
            ) -> Result<HashMap<String, u16>, Diagnostic> {
                Ok(HashMap::new())
            }
        }
        let program = parse_program("import { missing } from \"./a\";").expect("parse");
        let mut heap = HeapAllocator::new();
        let err = Compiler::new(&mut heap)
            .compile_module(&program, "/src/b.ts", &NoExports)
            .unwrap_err();
        assert_eq!(err.code, codes::COMPILE_UNRESOLVED_IMPORT);
    }

    #[test]
    fn test_register_window_high_water() {
        let chunk = compile("let a = 1; let b = 2; let c = a + b * (a + b);");
        assert!(chunk.register_count >= 3);
        assert!(chunk.register_count <= 16);
    }
}
