use std::fmt::Display;

/// Number of general purpose registers.
pub const REGISTER_COUNT: usize = 16;
/// Registers below this index are never allocated.
pub const RESERVE_COUNT: usize = 2;
/// The hard-wired zero register.
pub const NULL_REGISTER: usize = 0;
/// The return-value register.
pub const RETURN_REGISTER: usize = 1;
/// Pointers are machine addresses, 16 bits wide.
pub const POINTER_SIZE: i32 = 2;

/// A register operand: one of the sixteen numbered registers (the zero and
/// return-value registers print under their reserved names) or the stack
/// pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    R(usize),
    Sp,
}

impl Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Register::R(NULL_REGISTER) => f.write_str("NULL"),
            Register::R(RETURN_REGISTER) => f.write_str("RV"),
            Register::R(index) => write!(f, "r{index}"),
            Register::Sp => f.write_str("SP"),
        }
    }
}

/// Condition codes of the conditional branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Cond {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Cond::Eq => "breq",
            Cond::Ne => "brne",
            Cond::Lt => "brlt",
            Cond::Gt => "brgt",
            Cond::Le => "brle",
            Cond::Ge => "brge",
        }
    }
}

/// One row of the output listing. Instruction rows are tab-indented, labels
/// are not.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Label(String),

    Add(Register, Register, Register),
    Sub(Register, Register, Register),
    Mult(Register, Register, Register),
    And(Register, Register, Register),
    Or(Register, Register, Register),
    Xor(Register, Register, Register),
    Neg(Register, Register),
    Not(Register, Register),

    Addi(Register, Register, i32),
    Subi(Register, Register, i32),
    /// `addi` of a label address, used to materialise global addresses.
    AddiLabel(Register, Register, String),

    Cmp(Register, Register),
    Cmpi(Register, i32),

    Movhi(Register, i32),
    Movlo(Register, i32),
    Move(Register, Register),

    Ld(i32, Register, Register, i32),
    Str(i32, Register, Register, i32),

    Push(i32, Register),
    Pop(i32, Register),

    Call(String),
    Ret,
    Branch(Cond, String),
    Jmp(String),

    /// `.db` / `.dh` / `.dw` depending on the byte count.
    Data(i32, i32),

    /// A verbatim row from an `asm` escape.
    Raw(String),
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::Label(label) => write!(f, "{label}:"),
            Instruction::Add(rd, ra, rb) => write!(f, "\tadd {rd}, {ra}, {rb}"),
            Instruction::Sub(rd, ra, rb) => write!(f, "\tsub {rd}, {ra}, {rb}"),
            Instruction::Mult(rd, ra, rb) => write!(f, "\tmult {rd}, {ra}, {rb}"),
            Instruction::And(rd, ra, rb) => write!(f, "\tand {rd}, {ra}, {rb}"),
            Instruction::Or(rd, ra, rb) => write!(f, "\tor {rd}, {ra}, {rb}"),
            Instruction::Xor(rd, ra, rb) => write!(f, "\txor {rd}, {ra}, {rb}"),
            Instruction::Neg(rd, ra) => write!(f, "\tneg {rd}, {ra}"),
            Instruction::Not(rd, ra) => write!(f, "\tnot {rd}, {ra}"),
            Instruction::Addi(rd, ra, imm) => write!(f, "\taddi {rd}, {ra}, {imm}"),
            Instruction::Subi(rd, ra, imm) => write!(f, "\tsubi {rd}, {ra}, {imm}"),
            Instruction::AddiLabel(rd, ra, label) => write!(f, "\taddi {rd}, {ra}, {label}"),
            Instruction::Cmp(ra, rb) => write!(f, "\tcmp {ra}, {rb}"),
            Instruction::Cmpi(ra, imm) => write!(f, "\tcmpi {ra}, {imm}"),
            Instruction::Movhi(rd, imm) => write!(f, "\tmovhi {rd}, {imm}"),
            Instruction::Movlo(rd, imm) => write!(f, "\tmovlo {rd}, {imm}"),
            Instruction::Move(rd, ra) => write!(f, "\tmove {rd}, {ra}"),
            Instruction::Ld(size, rd, ra, offset) => {
                write!(f, "\tld[{size}] {rd}, {ra}, {offset}")
            }
            Instruction::Str(size, rd, ra, offset) => {
                write!(f, "\tstr[{size}] {rd}, {ra}, {offset}")
            }
            Instruction::Push(size, rd) => write!(f, "\tpush[{size}] {rd}"),
            Instruction::Pop(size, rd) => write!(f, "\tpop[{size}] {rd}"),
            Instruction::Call(target) => write!(f, "\tcall {target}"),
            Instruction::Ret => f.write_str("\tret"),
            Instruction::Branch(cond, label) => write!(f, "\t{} {label}", cond.mnemonic()),
            Instruction::Jmp(label) => write!(f, "\tjmp {label}"),
            Instruction::Data(size, value) => {
                let directive = match size {
                    1 => ".db",
                    2 => ".dh",
                    _ => ".dw",
                };
                write!(f, "\t{directive} {value}")
            }
            Instruction::Raw(row) => write!(f, "\t{row}"),
        }
    }
}
