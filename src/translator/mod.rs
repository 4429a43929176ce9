mod registers;
mod symbol_table;
mod type_table;

pub use registers::*;
pub use symbol_table::*;
pub use type_table::*;

use std::collections::HashMap;
use std::{error::Error, fmt::Display};

use colored::Colorize;
use log::debug;

use crate::asm::Register::{Sp, R};
use crate::asm::{
    Cond, Instruction, NULL_REGISTER, POINTER_SIZE, RETURN_REGISTER,
};
use crate::ast::*;
use crate::diagnostics;
use crate::lexer::decode_escapes;

use Instruction::*;

/// A committed translation failure, positioned at the offending node's
/// first token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl TranslationError {
    fn at(message: impl Into<String>, position: (usize, usize)) -> Self {
        Self {
            message: message.into(),
            line: position.0,
            col: position.1,
        }
    }
}

impl Display for TranslationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}:{}{}  {}",
            "--- Translation Error".red(),
            self.line,
            self.col,
            ":".red(),
            self.message
        )
    }
}

impl Error for TranslationError {}

/// Signature facts recorded from a declaration, used at call sites to pop
/// the argument bytes.
#[derive(Debug, Clone)]
pub struct FuncInfo {
    pub type_id: usize,
    pub param_sizes: Vec<i32>,
}

/// One-pass translator: walks the tree post-order, emitting rows while
/// coordinating the register allocator and the symbol table. The
/// instruction counter advances on every emitted row and is the only clock
/// the allocator sees.
pub struct Translator {
    pub symbols: SymbolTable,
    pub types: TypeTable,
    pub registers: RegisterAllocator,
    functions: HashMap<String, FuncInfo>,
    rows: Vec<Instruction>,
    instr_cnt: u64,
    label_cnt: usize,
    /// Bytes pushed since function entry; converts frame offsets into
    /// SP-relative ones.
    frame_depth: i32,
}

impl Translator {
    pub fn new() -> Self {
        Self {
            symbols: SymbolTable::new(),
            types: TypeTable::new(),
            registers: RegisterAllocator::new(),
            functions: HashMap::new(),
            rows: Vec::new(),
            instr_cnt: 0,
            label_cnt: 0,
            frame_depth: 0,
        }
    }

    pub fn translate(&mut self, program: &Program) -> Result<(), TranslationError> {
        for decl in &program.decls {
            self.translate_decl(decl)?;
        }
        Ok(())
    }

    pub fn rows(&self) -> &[Instruction] {
        &self.rows
    }

    /// The finished listing, one row per line.
    pub fn finish(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            out.push_str(&row.to_string());
            out.push('\n');
        }
        out
    }

    // ------------------------ emission helpers ------------------------

    fn emit(&mut self, row: Instruction) {
        self.rows.push(row);
        self.instr_cnt += 1;
    }

    fn next_label(&mut self) -> String {
        self.label_cnt += 1;
        format!("L{}", self.label_cnt)
    }

    fn push_instr(&mut self, reg: usize, size: i32) {
        self.emit(Push(size, R(reg)));
        self.frame_depth += size;
    }

    fn pop_instr(&mut self, reg: usize, size: i32) {
        self.emit(Pop(size, R(reg)));
        self.frame_depth -= size;
    }

    /// `addi rd, NULL, imm` for 16-bit values, `movhi`+`movlo` beyond.
    fn load_immediate(&mut self, reg: usize, value: i32) {
        if (i32::from(i16::MIN)..=i32::from(i16::MAX)).contains(&value) {
            self.emit(Addi(R(reg), R(NULL_REGISTER), value));
            return;
        }
        let hi = ((value as u32) >> 16) as i32;
        let lo = (value as u32 & 0xFFFF) as i32;
        self.emit(Movhi(R(reg), hi));
        self.emit(Movlo(R(reg), lo));
    }

    fn static_alloc(&mut self, label: &str, size: i32, value: i32) {
        self.emit(Label(label.to_owned()));
        self.emit(Data(size, value));
    }

    // ------------------------ register plumbing ------------------------

    fn new_temp_var(&mut self) -> VarId {
        self.symbols
            .add_var("__temp__", TypeTable::INT, 2, false, None)
    }

    fn allocate_temp_reg(&mut self) -> usize {
        let var = self.new_temp_var();
        let (reg, _) = self.registers.allocate(var, self.instr_cnt, false, true);
        reg
    }

    fn allocate_temp_imm(&mut self, value: i32) -> usize {
        let reg = self.allocate_temp_reg();
        self.load_immediate(reg, value);
        reg
    }

    /// Make `reg` safe to clobber: a named variable's register is handed
    /// to a fresh temporary, the return-value register is copied out.
    fn take_ownership_or_allocate(&mut self, reg: usize) -> usize {
        if reg == RETURN_REGISTER {
            let var = self.new_temp_var();
            let (new_reg, _) = self.registers.allocate(var, self.instr_cnt, false, true);
            self.emit(Move(R(new_reg), R(RETURN_REGISTER)));
            return new_reg;
        }
        if !self.registers.is_temporary(reg) {
            let var = self.new_temp_var();
            self.registers.give_ownership(reg, var);
        }
        reg
    }

    /// Stage a temporary on the stack; used around calls, which clobber
    /// the register file.
    fn push_temp(&mut self, reg: usize) -> VarId {
        let var = match self.registers.free(reg) {
            Some(var) => var,
            None => self.new_temp_var(),
        };
        let size = self.types.size_of(self.symbols.var(var).type_id);
        self.push_instr(reg, size);
        var
    }

    fn pop_temp(&mut self, var: VarId) -> usize {
        let (reg, _) = self.registers.allocate(var, self.instr_cnt, false, true);
        let size = self.types.size_of(self.symbols.var(var).type_id);
        self.pop_instr(reg, size);
        reg
    }

    fn free_if_temp(&mut self, reg: usize) {
        if self.registers.is_temporary(reg) {
            self.registers.free(reg);
        }
    }

    fn allocated_size(&self, decl_type: usize, is_pointer: bool) -> i32 {
        if is_pointer {
            POINTER_SIZE
        } else {
            self.types.size_of(decl_type)
        }
    }

    // ------------------------- declarations ---------------------------

    fn translate_decl(&mut self, decl: &Decl) -> Result<(), TranslationError> {
        match decl {
            Decl::Var(d) => self.translate_var_decl(d),
            Decl::Array(d) => self.translate_array_decl(d),
            Decl::Func(d) => self.translate_func_decl(d),
        }
    }

    fn translate_var_decl(&mut self, decl: &VarDecl) -> Result<(), TranslationError> {
        let size = self.allocated_size(decl.type_id, decl.is_pointer);

        if self.symbols.is_global_scope() {
            debug!("global variable '{}'", decl.identifier);

            let value = match &decl.value {
                Some(expr) => match expr.evaluate() {
                    Some(value) => value,
                    None => {
                        return Err(TranslationError::at(
                            format!("Non-static initialiser for global variable '{}'", decl.identifier),
                            decl.position(),
                        ))
                    }
                },
                None => 0,
            };

            self.symbols.add_var(
                &decl.identifier,
                decl.type_id,
                size,
                decl.is_pointer,
                Some(AddrInfo::Global(decl.identifier.clone())),
            );
            self.static_alloc(&decl.identifier, size, value);
            return Ok(());
        }

        debug!("local variable '{}'", decl.identifier);

        if self.symbols.shadows(&decl.identifier) {
            let (line, col) = decl.position();
            diagnostics::warn(
                &format!(
                    "Declaration of '{}' shadows an earlier declaration",
                    decl.identifier
                ),
                line,
                col,
            );
        }

        // Small variables occupy a 2-byte slot; larger ones a 4-aligned,
        // 4-rounded one.
        let (size_to_allocate, alignment) = if size <= 2 {
            (2, 0)
        } else {
            let alignment = self.symbols.current_scope_mut().align(4);
            let rounded = if size % 4 == 0 {
                size
            } else {
                size + (4 - size % 4)
            };
            (rounded, alignment)
        };

        let offset = -(self.symbols.current_scope().end_offset() + size_to_allocate);
        let var = self.symbols.add_var(
            &decl.identifier,
            decl.type_id,
            size_to_allocate,
            decl.is_pointer,
            Some(AddrInfo::Local(offset)),
        );
        self.symbols.current_scope_mut().allocate(size_to_allocate);

        match &decl.value {
            Some(expr) => {
                let value_reg = match expr.evaluate() {
                    Some(value) => {
                        let (reg, _) = self.registers.allocate(var, self.instr_cnt, true, false);
                        self.load_immediate(reg, value);
                        self.registers.unlock(reg);
                        reg
                    }
                    None => {
                        let reg = self.translate_expr(expr)?;
                        if reg == RETURN_REGISTER {
                            let (new_reg, _) =
                                self.registers.allocate(var, self.instr_cnt, false, false);
                            self.emit(Move(R(new_reg), R(RETURN_REGISTER)));
                            new_reg
                        } else {
                            self.registers.assign(reg, var);
                            reg
                        }
                    }
                };
                if alignment > 0 {
                    self.emit(Subi(Sp, Sp, alignment));
                    self.frame_depth += alignment;
                }
                self.push_instr(value_reg, size_to_allocate);
            }
            None => {
                self.emit(Subi(Sp, Sp, alignment + size_to_allocate));
                self.frame_depth += alignment + size_to_allocate;
            }
        }
        Ok(())
    }

    fn translate_array_decl(&mut self, decl: &ArrayDecl) -> Result<(), TranslationError> {
        if self.symbols.is_global_scope() {
            self.translate_global_array_decl(decl)
        } else {
            self.translate_local_array_decl(decl)
        }
    }

    /// Convert the init list to constants; every entry must be static.
    fn init_list_to_values(values: &[Expr]) -> Result<Vec<i32>, TranslationError> {
        values
            .iter()
            .map(|expr| {
                expr.evaluate().ok_or_else(|| {
                    TranslationError::at(
                        "Non-static value in array initializer list",
                        expr.position(),
                    )
                })
            })
            .collect()
    }

    /// The string literal's bytes with escapes decoded and a closing NUL.
    fn string_bytes(literal: &str) -> Vec<u8> {
        let mut bytes = decode_escapes(literal);
        bytes.push(0);
        bytes
    }

    fn translate_global_array_decl(&mut self, decl: &ArrayDecl) -> Result<(), TranslationError> {
        match decl {
            ArrayDecl::Simple(d) => {
                let elem = self.types.size_of(d.type_id);
                let count = d.size.evaluate().ok_or_else(|| {
                    TranslationError::at("Non-static array size", d.size.position())
                })?;

                self.symbols.add_var(
                    &d.identifier,
                    d.type_id,
                    count * elem,
                    false,
                    Some(AddrInfo::Global(d.identifier.clone())),
                );
                self.emit(Label(d.identifier.clone()));
                for _ in 0..count {
                    self.emit(Data(elem, 0));
                }
            }
            ArrayDecl::InitList(d) => {
                let elem = self.types.size_of(d.type_id);
                let values = Self::init_list_to_values(&d.values)?;

                self.symbols.add_var(
                    &d.identifier,
                    d.type_id,
                    values.len() as i32 * elem,
                    false,
                    Some(AddrInfo::Global(d.identifier.clone())),
                );
                self.emit(Label(d.identifier.clone()));
                for value in values {
                    self.emit(Data(elem, value));
                }
            }
            ArrayDecl::Str(d) => {
                let bytes = Self::string_bytes(&d.literal);

                self.symbols.add_var(
                    &d.identifier,
                    d.type_id,
                    bytes.len() as i32,
                    false,
                    Some(AddrInfo::Global(d.identifier.clone())),
                );
                self.emit(Label(d.identifier.clone()));
                for byte in bytes {
                    self.emit(Data(1, i32::from(byte)));
                }
            }
        }
        Ok(())
    }

    fn translate_local_array_decl(&mut self, decl: &ArrayDecl) -> Result<(), TranslationError> {
        if self.symbols.shadows(decl.identifier()) {
            let (line, col) = decl.position();
            diagnostics::warn(
                &format!(
                    "Declaration of '{}' shadows an earlier declaration",
                    decl.identifier()
                ),
                line,
                col,
            );
        }

        match decl {
            ArrayDecl::Simple(d) => {
                let elem = self.types.size_of(d.type_id);
                let count = d.size.evaluate().ok_or_else(|| {
                    TranslationError::at("Non-static array size", d.size.position())
                })?;
                let total = count * elem;

                let alignment = if elem > 2 {
                    self.symbols.current_scope_mut().align(4)
                } else {
                    0
                };
                let offset = -(self.symbols.current_scope().end_offset() + total);
                self.symbols.add_var(
                    &d.identifier,
                    d.type_id,
                    total,
                    false,
                    Some(AddrInfo::Local(offset)),
                );
                self.symbols.current_scope_mut().allocate(total);

                self.emit(Subi(Sp, Sp, alignment + total));
                self.frame_depth += alignment + total;
            }
            ArrayDecl::InitList(d) => {
                let elem = self.types.size_of(d.type_id);
                let values = Self::init_list_to_values(&d.values)?;
                let total = values.len() as i32 * elem;

                let alignment = if elem > 2 {
                    self.symbols.current_scope_mut().align(4)
                } else {
                    0
                };
                let offset = -(self.symbols.current_scope().end_offset() + total);
                self.symbols.add_var(
                    &d.identifier,
                    d.type_id,
                    total,
                    false,
                    Some(AddrInfo::Local(offset)),
                );
                self.symbols.current_scope_mut().allocate(total);

                if alignment > 0 {
                    self.emit(Subi(Sp, Sp, alignment));
                    self.frame_depth += alignment;
                }

                // Pushed in reverse so element 0 lands at the lowest
                // address.
                let reg = self.allocate_temp_reg();
                for value in values.into_iter().rev() {
                    self.load_immediate(reg, value);
                    self.push_instr(reg, elem);
                }
                self.registers.free(reg);
            }
            ArrayDecl::Str(d) => {
                let bytes = Self::string_bytes(&d.literal);
                let total = bytes.len() as i32;

                let offset = -(self.symbols.current_scope().end_offset() + total);
                self.symbols.add_var(
                    &d.identifier,
                    d.type_id,
                    total,
                    false,
                    Some(AddrInfo::Local(offset)),
                );
                self.symbols.current_scope_mut().allocate(total);

                let reg = self.allocate_temp_reg();
                for byte in bytes.into_iter().rev() {
                    self.load_immediate(reg, i32::from(byte));
                    self.push_instr(reg, 1);
                }
                self.registers.free(reg);
            }
        }
        Ok(())
    }

    fn translate_func_decl(&mut self, decl: &FuncDecl) -> Result<(), TranslationError> {
        let param_sizes: Vec<i32> = decl
            .params
            .iter()
            .map(|p| self.allocated_size(p.type_id, p.is_pointer))
            .collect();
        self.functions.insert(
            decl.identifier.clone(),
            FuncInfo {
                type_id: decl.type_id,
                param_sizes: param_sizes.clone(),
            },
        );

        let Some(body) = &decl.body else {
            return Ok(());
        };

        self.emit(Label(decl.identifier.clone()));
        self.registers.free_all();
        self.frame_depth = 0;
        self.symbols.push_scope(false);

        // Parameter slots start past the 2-byte return-address slot.
        let mut offset = 2;
        for (param, size) in decl.params.iter().zip(param_sizes) {
            self.symbols.add_var(
                &param.identifier,
                param.type_id,
                size,
                param.is_pointer,
                Some(AddrInfo::Local(offset)),
            );
            offset += size;
        }

        let result = self.translate_stmt(body);
        self.symbols.pop_scope();
        result?;

        self.emit(Ret);
        Ok(())
    }

    // -------------------------- statements ----------------------------

    fn translate_stmt(&mut self, stmt: &Stmt) -> Result<(), TranslationError> {
        match stmt {
            Stmt::Block(block) => self.translate_block(block),
            Stmt::If(s) => self.translate_if(s),
            Stmt::While(s) => self.translate_while(s),
            Stmt::Asm(s) => self.translate_asm(s),
            Stmt::VarDecl(s) => self.translate_var_decl(s),
            Stmt::ArrayDecl(s) => self.translate_array_decl(s),
            Stmt::Assign(s) => self.translate_assign(s),
            Stmt::DerefAssign(s) => self.translate_deref_assign(s),
            Stmt::IndexedAssign(s) => self.translate_indexed_assign(s),
            Stmt::Return(s) => self.translate_return(s),
            Stmt::Expr(s) => {
                let reg = self.translate_expr(&s.expr)?;
                self.free_if_temp(reg);
                Ok(())
            }
        }
    }

    fn translate_block(&mut self, block: &BlockStmt) -> Result<(), TranslationError> {
        self.symbols.push_scope(true);

        let mut result = Ok(());
        for statement in &block.statements {
            result = self.translate_stmt(statement);
            if result.is_err() {
                break;
            }
        }

        if result.is_ok() {
            // Throw away this block's locals.
            let scope_size = self.symbols.current_scope().size();
            if scope_size > 0 {
                self.emit(Addi(Sp, Sp, scope_size));
                self.frame_depth -= scope_size;
            }
        }

        self.symbols.pop_scope();
        result
    }

    fn translate_if(&mut self, s: &IfStmt) -> Result<(), TranslationError> {
        let cond_reg = self.translate_expr(&s.cond)?;
        self.emit(Cmpi(R(cond_reg), 0));
        self.free_if_temp(cond_reg);

        match &s.else_actions {
            Some(else_actions) => {
                let else_label = self.next_label();
                let end_label = self.next_label();

                self.emit(Branch(Cond::Eq, else_label.clone()));
                self.registers.free_all();
                self.translate_stmt(&s.actions)?;
                self.emit(Jmp(end_label.clone()));

                self.emit(Label(else_label));
                self.registers.free_all();
                self.translate_stmt(else_actions)?;

                self.emit(Label(end_label));
                self.registers.free_all();
            }
            None => {
                let end_label = self.next_label();

                self.emit(Branch(Cond::Eq, end_label.clone()));
                self.registers.free_all();
                self.translate_stmt(&s.actions)?;

                self.emit(Label(end_label));
                self.registers.free_all();
            }
        }
        Ok(())
    }

    fn translate_while(&mut self, s: &WhileStmt) -> Result<(), TranslationError> {
        let top_label = self.next_label();
        let end_label = self.next_label();

        // The condition re-runs on the back edge; it must not rely on
        // registers cached before the loop.
        self.registers.free_all();
        self.emit(Label(top_label.clone()));

        let cond_reg = self.translate_expr(&s.cond)?;
        self.emit(Cmpi(R(cond_reg), 0));
        self.free_if_temp(cond_reg);
        self.emit(Branch(Cond::Eq, end_label.clone()));

        self.translate_stmt(&s.actions)?;
        self.registers.free_all();
        self.emit(Jmp(top_label));

        self.emit(Label(end_label));
        self.registers.free_all();
        Ok(())
    }

    fn translate_asm(&mut self, s: &AsmStmt) -> Result<(), TranslationError> {
        let template = String::from_utf8_lossy(&decode_escapes(&s.template)).into_owned();

        // Positional substitution, highest index first so %1 never eats
        // the prefix of %10.
        let mut resolved = template;
        for (i, param) in s.params.iter().enumerate().rev() {
            let replacement = match param {
                Term::Id(t) => {
                    let reg = self.translate_identifier(&t.identifier, t.position())?;
                    R(reg).to_string()
                }
                Term::Lit(t) => t.literal.to_string(),
                _ => continue,
            };
            resolved = resolved.replace(&format!("%{i}"), &replacement);
        }

        for line in resolved.lines() {
            let line = line.trim();
            if !line.is_empty() {
                self.emit(Raw(line.to_owned()));
            }
        }

        // Hand-written rows may clobber anything.
        self.registers.free_all();
        Ok(())
    }

    fn translate_assign(&mut self, s: &AssignStmt) -> Result<(), TranslationError> {
        let reg = self.translate_expr(&s.rvalue)?;

        let Some(var) = self.symbols.get(&s.identifier) else {
            return Err(TranslationError::at(
                format!("Unknown identifier '{}'", s.identifier),
                s.tokens.first().map(|t| t.position()).unwrap_or((0, 0)),
            ));
        };

        self.store_var(reg, var);

        // The register now caches the variable; any previous holder is
        // stale.
        if let Some(old) = self.registers.holder_of(var) {
            if old != reg {
                self.registers.free(old);
            }
        }
        if reg != RETURN_REGISTER && self.registers.is_temporary(reg) {
            self.registers.assign(reg, var);
        }
        Ok(())
    }

    /// Write a register back to a variable's memory home.
    fn store_var(&mut self, reg: usize, var: VarId) {
        let info = self.symbols.var(var).clone();
        match info.address {
            Some(AddrInfo::Global(label)) => {
                self.registers.lock(reg);
                let addr_reg = self.allocate_temp_reg();
                self.emit(AddiLabel(R(addr_reg), R(NULL_REGISTER), label));
                self.emit(Str(info.size, R(reg), R(addr_reg), 0));
                self.registers.free(addr_reg);
                self.registers.unlock(reg);
            }
            Some(AddrInfo::Local(offset)) => {
                self.emit(Str(info.size, R(reg), Sp, offset + self.frame_depth));
            }
            None => unreachable!("store into a variable without a memory home"),
        }
    }

    fn translate_deref_assign(&mut self, s: &DerefAssignStmt) -> Result<(), TranslationError> {
        let value_reg = self.translate_expr(&s.rvalue)?;
        let value_reg = self.take_ownership_or_allocate(value_reg);
        self.registers.lock(value_reg);

        let position = s.tokens.first().map(|t| t.position()).unwrap_or((0, 0));
        let Some(var) = self.symbols.get(&s.identifier) else {
            return Err(TranslationError::at(
                format!("Unknown identifier '{}'", s.identifier),
                position,
            ));
        };
        let size = self.types.size_of(self.symbols.var(var).type_id);

        let ptr_reg = self.translate_identifier(&s.identifier, position)?;
        self.emit(Str(size, R(value_reg), R(ptr_reg), 0));

        self.registers.unlock(value_reg);
        self.free_if_temp(value_reg);
        Ok(())
    }

    fn translate_indexed_assign(&mut self, s: &IndexedAssignStmt) -> Result<(), TranslationError> {
        let position = s.tokens.first().map(|t| t.position()).unwrap_or((0, 0));

        let value_reg = self.translate_expr(&s.rvalue)?;
        let mut value_reg = self.take_ownership_or_allocate(value_reg);

        let Some(var) = self.symbols.get(&s.identifier) else {
            return Err(TranslationError::at(
                format!("Unknown identifier '{}'", s.identifier),
                position,
            ));
        };
        let info = self.symbols.var(var).clone();
        let elem = self.types.size_of(info.type_id);

        match s.index.evaluate() {
            Some(index) => {
                self.registers.lock(value_reg);
                match &info.address {
                    Some(AddrInfo::Global(label)) => {
                        let addr_reg = self.allocate_temp_reg();
                        self.emit(AddiLabel(R(addr_reg), R(NULL_REGISTER), label.clone()));
                        self.emit(Str(elem, R(value_reg), R(addr_reg), index * elem));
                        self.registers.free(addr_reg);
                    }
                    Some(AddrInfo::Local(offset)) => {
                        self.emit(Str(
                            elem,
                            R(value_reg),
                            Sp,
                            offset + self.frame_depth + index * elem,
                        ));
                    }
                    None => unreachable!("array without a memory home"),
                }
                self.registers.unlock(value_reg);
            }
            None => {
                // A call inside the index clobbers the register file; stage
                // the value on the stack around it.
                let saved = if s.index.contains_call() {
                    Some(self.push_temp(value_reg))
                } else {
                    self.registers.lock(value_reg);
                    None
                };

                let base_reg = self.indexed_address(&info, &s.index)?;
                self.registers.lock(base_reg);

                if let Some(saved) = saved {
                    value_reg = self.pop_temp(saved);
                }

                self.emit(Str(elem, R(value_reg), R(base_reg), 0));
                self.registers.unlock(base_reg);
                self.registers.free(base_reg);
                self.registers.unlock(value_reg);
            }
        }

        self.free_if_temp(value_reg);
        Ok(())
    }

    /// Compute `&ident[index]` into a fresh temporary for a non-constant
    /// index.
    fn indexed_address(&mut self, info: &VarInfo, index: &Expr) -> Result<usize, TranslationError> {
        let elem = self.types.size_of(info.type_id);

        let idx_reg = self.translate_expr(index)?;
        let idx_reg = self.take_ownership_or_allocate(idx_reg);

        if elem > 1 {
            self.registers.lock(idx_reg);
            let size_reg = self.allocate_temp_imm(elem);
            self.emit(Mult(R(idx_reg), R(idx_reg), R(size_reg)));
            self.registers.free(size_reg);
            self.registers.unlock(idx_reg);
        }

        self.registers.lock(idx_reg);
        let base_reg = self.allocate_temp_reg();
        match &info.address {
            Some(AddrInfo::Global(label)) => {
                self.emit(AddiLabel(R(base_reg), R(NULL_REGISTER), label.clone()));
            }
            Some(AddrInfo::Local(offset)) => {
                self.emit(Addi(R(base_reg), Sp, offset + self.frame_depth));
            }
            None => unreachable!("array without a memory home"),
        }
        self.emit(Add(R(base_reg), R(base_reg), R(idx_reg)));
        self.registers.unlock(idx_reg);
        self.free_if_temp(idx_reg);
        Ok(base_reg)
    }

    fn translate_return(&mut self, s: &ReturnStmt) -> Result<(), TranslationError> {
        let reg = self.translate_expr(&s.return_value)?;
        if reg != RETURN_REGISTER {
            self.emit(Move(R(RETURN_REGISTER), R(reg)));
        }
        self.free_if_temp(reg);
        self.emit(Ret);
        Ok(())
    }

    // ------------------------- expressions ----------------------------

    /// Translate an expression; the returned register holds its value.
    fn translate_expr(&mut self, expr: &Expr) -> Result<usize, TranslationError> {
        match expr {
            Expr::Term(t) => self.translate_term(t),
            Expr::Neg(e) => {
                if let Some(value) = e.value.evaluate() {
                    return Ok(self.allocate_temp_imm(value.wrapping_neg()));
                }
                let reg = self.translate_term(&e.value)?;
                let reg = self.take_ownership_or_allocate(reg);
                self.emit(Neg(R(reg), R(reg)));
                Ok(reg)
            }
            Expr::Not(e) => {
                if let Some(value) = e.value.evaluate() {
                    return Ok(self.allocate_temp_imm(i32::from(value == 0)));
                }
                let reg = self.translate_term(&e.value)?;
                let reg = self.take_ownership_or_allocate(reg);
                self.emit(Cmpi(R(reg), 0));
                self.emit_flag_materialisation(reg, Cond::Eq);
                Ok(reg)
            }
            Expr::Binop(b) => self.translate_binop(b),
        }
    }

    /// `br<cc> Ltrue; addi r, NULL, 0; jmp Lend; Ltrue:; addi r, NULL, 1;
    /// Lend:`
    fn emit_flag_materialisation(&mut self, reg: usize, cond: Cond) {
        let true_label = self.next_label();
        let end_label = self.next_label();

        self.emit(Branch(cond, true_label.clone()));
        self.emit(Addi(R(reg), R(NULL_REGISTER), 0));
        self.emit(Jmp(end_label.clone()));
        self.emit(Label(true_label));
        self.emit(Addi(R(reg), R(NULL_REGISTER), 1));
        self.emit(Label(end_label));
    }

    fn translate_term(&mut self, term: &Term) -> Result<usize, TranslationError> {
        match term {
            Term::Lit(t) => Ok(self.allocate_temp_imm(t.literal)),
            Term::Paren(t) => self.translate_expr(&t.expr),
            Term::Id(t) => self.translate_identifier(&t.identifier, t.position()),
            Term::Call(t) => self.translate_call(t),
            Term::AddrOf(t) => self.translate_addr_of(t),
            Term::Deref(t) => self.translate_deref(t),
            Term::Indexed(t) => self.translate_indexed(t),
        }
    }

    /// Load a variable, reusing a register that already caches it.
    fn translate_identifier(
        &mut self,
        name: &str,
        position: (usize, usize),
    ) -> Result<usize, TranslationError> {
        let Some(var) = self.symbols.get(name) else {
            return Err(TranslationError::at(
                format!("Unknown identifier '{name}'"),
                position,
            ));
        };
        let info = self.symbols.var(var).clone();

        let (reg, hit) = self.registers.allocate(var, self.instr_cnt, false, false);
        if !hit {
            match info.address {
                Some(AddrInfo::Global(label)) => {
                    self.emit(AddiLabel(R(reg), R(NULL_REGISTER), label));
                    self.emit(Ld(info.size, R(reg), R(reg), 0));
                }
                Some(AddrInfo::Local(offset)) => {
                    self.emit(Ld(info.size, R(reg), Sp, offset + self.frame_depth));
                }
                None => unreachable!("temporary '{}' has no memory home", info.id),
            }
        }
        Ok(reg)
    }

    fn translate_call(&mut self, t: &CallTerm) -> Result<usize, TranslationError> {
        let sizes = self
            .functions
            .get(&t.identifier)
            .map(|f| f.param_sizes.clone());
        if sizes.is_none() {
            let (line, col) = t.position();
            diagnostics::warn(
                &format!("Call to undeclared function '{}'", t.identifier),
                line,
                col,
            );
        }
        let sizes = sizes.unwrap_or_default();

        // Arguments go right to left so the first parameter ends up just
        // above the return-address slot.
        let mut pushed = 0;
        for (i, param) in t.params.iter().enumerate().rev() {
            let reg = self.translate_expr(param)?;
            let size = sizes.get(i).copied().unwrap_or(POINTER_SIZE);
            self.push_instr(reg, size);
            self.free_if_temp(reg);
            pushed += size;
        }

        self.emit(Call(t.identifier.clone()));
        self.registers.free_all();

        if pushed > 0 {
            self.emit(Addi(Sp, Sp, pushed));
            self.frame_depth -= pushed;
        }
        Ok(RETURN_REGISTER)
    }

    fn translate_addr_of(&mut self, t: &AddrOfTerm) -> Result<usize, TranslationError> {
        let Some(var) = self.symbols.get(&t.identifier) else {
            return Err(TranslationError::at(
                format!("Unknown identifier '{}'", t.identifier),
                t.position(),
            ));
        };
        let info = self.symbols.var(var).clone();

        let reg = self.allocate_temp_reg();
        match info.address {
            Some(AddrInfo::Global(label)) => {
                self.emit(AddiLabel(R(reg), R(NULL_REGISTER), label));
            }
            Some(AddrInfo::Local(offset)) => {
                self.emit(Addi(R(reg), Sp, offset + self.frame_depth));
            }
            None => unreachable!("address of a register-only temporary"),
        }
        Ok(reg)
    }

    fn translate_deref(&mut self, t: &DerefTerm) -> Result<usize, TranslationError> {
        let Some(var) = self.symbols.get(&t.identifier) else {
            return Err(TranslationError::at(
                format!("Unknown identifier '{}'", t.identifier),
                t.position(),
            ));
        };
        let size = self.types.size_of(self.symbols.var(var).type_id);

        let ptr_reg = self.translate_identifier(&t.identifier, t.position())?;
        self.registers.lock(ptr_reg);
        let reg = self.allocate_temp_reg();
        self.emit(Ld(size, R(reg), R(ptr_reg), 0));
        self.registers.unlock(ptr_reg);
        Ok(reg)
    }

    fn translate_indexed(&mut self, t: &IndexedTerm) -> Result<usize, TranslationError> {
        let Some(var) = self.symbols.get(&t.identifier) else {
            return Err(TranslationError::at(
                format!("Unknown identifier '{}'", t.identifier),
                t.position(),
            ));
        };
        let info = self.symbols.var(var).clone();
        let elem = self.types.size_of(info.type_id);

        match t.index.evaluate() {
            Some(index) => {
                let reg = self.allocate_temp_reg();
                match info.address {
                    Some(AddrInfo::Global(label)) => {
                        self.emit(AddiLabel(R(reg), R(NULL_REGISTER), label));
                        self.emit(Ld(elem, R(reg), R(reg), index * elem));
                    }
                    Some(AddrInfo::Local(offset)) => {
                        self.emit(Ld(elem, R(reg), Sp, offset + self.frame_depth + index * elem));
                    }
                    None => unreachable!("array without a memory home"),
                }
                Ok(reg)
            }
            None => {
                let base_reg = self.indexed_address(&info, &t.index)?;
                self.emit(Ld(elem, R(base_reg), R(base_reg), 0));
                Ok(base_reg)
            }
        }
    }

    // --------------------- binary operations --------------------------

    fn translate_binop(&mut self, binop: &BinopExpr) -> Result<usize, TranslationError> {
        if !binop.left_assoc {
            return Err(TranslationError::at(
                "Expression is right-associative",
                binop.tokens.first().map(|t| t.position()).unwrap_or((0, 0)),
            ));
        }

        match binop.op {
            BinopKind::Add => self.translate_binop_imm(binop, Add, Addi),
            BinopKind::Sub => self.translate_binop_imm(binop, Sub, Subi),
            BinopKind::Mul => self.translate_binop_reg(binop, Mult),
            BinopKind::And => self.translate_binop_reg(binop, And),
            BinopKind::Or => self.translate_binop_reg(binop, Or),
            BinopKind::Eq => self.translate_binop_relational(binop, Cond::Eq),
            BinopKind::Neq => self.translate_binop_relational(binop, Cond::Ne),
            BinopKind::Less => self.translate_binop_relational(binop, Cond::Lt),
            BinopKind::Greater => self.translate_binop_relational(binop, Cond::Gt),
            BinopKind::LessEq => self.translate_binop_relational(binop, Cond::Le),
            BinopKind::GreaterEq => self.translate_binop_relational(binop, Cond::Ge),
        }
    }

    /// The left operand's value, owned by a clobberable register.
    fn binop_left_register(&mut self, binop: &BinopExpr) -> Result<usize, TranslationError> {
        match binop.rest.evaluate() {
            Some(value) => Ok(self.allocate_temp_imm(value)),
            None => {
                let reg = self.translate_expr(&binop.rest)?;
                Ok(self.take_ownership_or_allocate(reg))
            }
        }
    }

    /// Translate the right operand, staging the left value on the stack
    /// when the right side is a call (calls clobber the register file).
    fn binop_right_register(
        &mut self,
        binop: &BinopExpr,
        left: usize,
    ) -> Result<(usize, usize), TranslationError> {
        if matches!(binop.term.as_ref(), Expr::Term(Term::Call(_))) {
            let saved = self.push_temp(left);
            let right = self.translate_expr(&binop.term)?;
            let left = self.pop_temp(saved);
            Ok((left, right))
        } else {
            self.registers.lock(left);
            let right = self.translate_expr(&binop.term)?;
            self.registers.unlock(left);
            Ok((left, right))
        }
    }

    fn check_immediate_width(value: i32, binop: &BinopExpr) -> Result<(), TranslationError> {
        if (i32::from(i16::MIN)..=i32::from(i16::MAX)).contains(&value) {
            return Ok(());
        }
        Err(TranslationError::at(
            "Constant can't be wider than 16 bits",
            binop.tokens.first().map(|t| t.position()).unwrap_or((0, 0)),
        ))
    }

    /// Operators with an immediate form: the immediate is used when the
    /// right operand is a 16-bit constant.
    fn translate_binop_imm(
        &mut self,
        binop: &BinopExpr,
        instr: fn(crate::asm::Register, crate::asm::Register, crate::asm::Register) -> Instruction,
        imm_instr: fn(crate::asm::Register, crate::asm::Register, i32) -> Instruction,
    ) -> Result<usize, TranslationError> {
        let left = self.binop_left_register(binop)?;

        match binop.term.evaluate() {
            Some(value) => {
                Self::check_immediate_width(value, binop)?;
                self.emit(imm_instr(R(left), R(left), value));
                Ok(left)
            }
            None => {
                let (left, right) = self.binop_right_register(binop, left)?;
                self.emit(instr(R(left), R(left), R(right)));
                self.free_if_temp(right);
                Ok(left)
            }
        }
    }

    /// Operators without an immediate form: a constant right operand is
    /// loaded into a scratch register first.
    fn translate_binop_reg(
        &mut self,
        binop: &BinopExpr,
        instr: fn(crate::asm::Register, crate::asm::Register, crate::asm::Register) -> Instruction,
    ) -> Result<usize, TranslationError> {
        let left = self.binop_left_register(binop)?;

        let (left, right) = match binop.term.evaluate() {
            Some(value) => {
                self.registers.lock(left);
                let right = self.allocate_temp_imm(value);
                self.registers.unlock(left);
                (left, right)
            }
            None => self.binop_right_register(binop, left)?,
        };

        self.emit(instr(R(left), R(left), R(right)));
        self.free_if_temp(right);
        Ok(left)
    }

    /// Relationals compare and then materialise 0 or 1 in the result
    /// register.
    fn translate_binop_relational(
        &mut self,
        binop: &BinopExpr,
        cond: Cond,
    ) -> Result<usize, TranslationError> {
        let mut left = self.binop_left_register(binop)?;

        match binop.term.evaluate() {
            Some(value) => {
                Self::check_immediate_width(value, binop)?;
                self.emit(Cmpi(R(left), value));
            }
            None => {
                let (new_left, right) = self.binop_right_register(binop, left)?;
                left = new_left;
                self.emit(Cmp(R(left), R(right)));
                self.free_if_temp(right);
            }
        }

        self.emit_flag_materialisation(left, cond);
        Ok(left)
    }
}

impl Default for Translator {
    fn default() -> Self {
        Self::new()
    }
}
