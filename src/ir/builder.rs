//! Construction of linked programs.
//!
//! The builder is the crate's input surface: it accepts the shapes the
//! front end produces — blocks, flat instructions, children edges, the
//! block-to-function mapping and the structured-control marks — and turns
//! them into a linked, validated [`Program`].

use crate::error::{CompileError, Result};

use super::block::{Block, BlockKind, Repeat};
use super::instr::{BlockId, InstrId, Opcode, Operand};
use super::program::Program;
use super::symbols::{FuncId, FunctionSymbol, SymbolTable, Type};

pub struct ProgramBuilder {
    program: Program,
    table: SymbolTable,
    scope: Option<FuncId>,
    /// Entry block of the top-level code (the first block built outside
    /// any function).
    main_entry: Option<BlockId>,
    /// Function entries in declaration order.
    entries: Vec<BlockId>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self {
            program: Program::default(),
            table: SymbolTable::new(),
            scope: None,
            main_entry: None,
            entries: Vec::new(),
        }
    }

    pub fn global(&mut self, name: &str) {
        self.table.insert_global(name, Type::Int);
    }

    pub fn global_array(&mut self, name: &str, shape: Vec<usize>) {
        self.table.insert_global_array(name, shape);
    }

    /// Declare a function. Its body is built between `begin_function` and
    /// `end_function`; the first block created inside becomes its entry.
    pub fn function(&mut self, name: &str, return_type: Type, params: &[&str]) -> FuncId {
        let params = params.iter().map(|p| p.to_string()).collect();
        self.table
            .insert_function(FunctionSymbol::new(name, return_type, params))
    }

    pub fn local(&mut self, func: FuncId, name: &str, ty: Type) {
        self.table.function_mut(func).insert_local(name, ty);
    }

    pub fn local_array(&mut self, func: FuncId, name: &str, shape: Vec<usize>) {
        self.table.function_mut(func).insert_local(name, Type::Array);
        self.table.function_mut(func).insert_array_shape(name, shape);
    }

    pub fn begin_function(&mut self, func: FuncId) {
        self.scope = Some(func);
    }

    pub fn end_function(&mut self) {
        self.scope = None;
    }

    /// Create a new block in the current scope.
    pub fn block(&mut self) -> BlockId {
        let id = BlockId(self.program.blocks.len());
        self.program.blocks.push(Block::new(id, self.scope));
        match self.scope {
            Some(func) => {
                if self.table.function(func).entry() == BlockId(usize::MAX) {
                    self.table.function_mut(func).set_entry(id);
                    self.entries.push(id);
                }
            }
            None => {
                if self.main_entry.is_none() {
                    self.main_entry = Some(id);
                }
            }
        }
        id
    }

    /// Add a control-flow edge (a "children" entry in front-end terms).
    pub fn edge(&mut self, from: BlockId, to: BlockId) {
        let succs = &mut self.program.block_mut(from).succs;
        if !succs.contains(&to) {
            succs.push(to);
        }
    }

    /// Append a raw instruction to a block.
    pub fn emit(
        &mut self,
        block: BlockId,
        op: Opcode,
        src: Option<Operand>,
        dst: Option<Operand>,
    ) -> InstrId {
        let id = self.program.create_instr(op);
        {
            let instr = self.program.instr_mut(id);
            instr.src = src;
            instr.dst = dst;
        }
        self.program.block_mut(block).instrs.push(id);
        if op == Opcode::Ret && !self.program.exits.contains(&block) {
            self.program.exits.push(block);
        }
        id
    }

    pub fn arith(&mut self, block: BlockId, op: Opcode, src: Operand, dst: Operand) -> InstrId {
        self.emit(block, op, Some(src), Some(dst))
    }

    /// `MOVE value -> name`.
    pub fn move_to(&mut self, block: BlockId, name: &str, value: Operand) -> InstrId {
        self.emit(block, Opcode::Move, Some(value), Some(Operand::name(name)))
    }

    pub fn write(&mut self, block: BlockId, value: Operand) -> InstrId {
        self.emit(block, Opcode::Write, Some(value), None)
    }

    pub fn write_nl(&mut self, block: BlockId) -> InstrId {
        self.emit(block, Opcode::WriteNl, None, None)
    }

    pub fn read(&mut self, block: BlockId) -> InstrId {
        self.emit(block, Opcode::Read, None, None)
    }

    pub fn ret(&mut self, block: BlockId, value: Option<Operand>) -> InstrId {
        self.emit(block, Opcode::Ret, value, None)
    }

    /// A conditional branch on `cond`, taken towards `target`.
    pub fn branch(&mut self, block: BlockId, op: Opcode, cond: Operand, target: BlockId) -> InstrId {
        debug_assert!(op.is_conditional_branch());
        self.emit(block, op, Some(cond), Some(Operand::block(target)))
    }

    pub fn jump(&mut self, block: BlockId, target: BlockId) -> InstrId {
        self.emit(block, Opcode::Bra, Some(Operand::block(target)), None)
    }

    pub fn call(&mut self, block: BlockId, callee: &str, args: Vec<Operand>) -> InstrId {
        let id = self.emit(block, Opcode::Call, Some(Operand::name(callee)), None);
        self.program.instr_mut(id).args = args;
        id
    }

    pub fn load(&mut self, block: BlockId, address: Operand) -> InstrId {
        self.emit(block, Opcode::Load, Some(address), None)
    }

    pub fn store(&mut self, block: BlockId, value: Operand, address: Operand) -> InstrId {
        self.emit(block, Opcode::Store, Some(value), Some(address))
    }

    /// `ADDA offset base-array` — element address within `array`.
    pub fn adda(&mut self, block: BlockId, offset: Operand, array: &str) -> InstrId {
        self.emit(block, Opcode::Adda, Some(offset), Some(Operand::name(array)))
    }

    /// Mark a two-way branch header with its structured pointers.
    pub fn mark_if(&mut self, header: BlockId, then: BlockId, els: BlockId, join: BlockId) {
        self.program.block_mut(header).kind = BlockKind::If { then, els, join };
    }

    /// Mark a pre-test loop header with its structured pointers.
    pub fn mark_while(&mut self, header: BlockId, body: BlockId, exit: BlockId) {
        self.program.block_mut(header).kind = BlockKind::While { body, exit };
    }

    /// Mark the entry of a post-test loop body with its compare and exit
    /// blocks.
    pub fn mark_repeat(&mut self, body: BlockId, compare: BlockId, exit: BlockId) {
        self.program.block_mut(body).repeat = Some(Repeat { compare, exit });
    }

    /// Link and validate the program. The root list is assembled with the
    /// function entries first, in declaration order, and the top-level
    /// entry last.
    pub fn finish(mut self) -> Result<(Program, SymbolTable)> {
        let main = self
            .main_entry
            .ok_or_else(|| CompileError::malformed(0, "program has no top-level code"))?;
        self.program.roots = self.entries.clone();
        self.program.roots.push(main);

        for function in self.table.functions() {
            if function.entry() == BlockId(usize::MAX) {
                return Err(CompileError::malformed(
                    0,
                    format!("function '{}' has no body", function.name()),
                ));
            }
        }

        self.program.link(&self.table)?;

        // Every root must reach a return, or backward analyses have no
        // anchor to start from.
        for root in self.program.roots.clone() {
            let reachable = self.program.forward_order(root);
            if !reachable.iter().any(|b| self.program.exits.contains(b)) {
                let name = match self.program.block(root).scope {
                    Some(func) => self.table.function(func).name().to_string(),
                    None => "main".to_string(),
                };
                return Err(CompileError::MissingReturn(name));
            }
        }
        self.program.reset_visited();

        Ok((self.program, self.table))
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_line_program_builds_and_links() {
        let mut b = ProgramBuilder::new();
        b.global("x");
        let b0 = b.block();
        let sum = b.arith(b0, Opcode::Add, Operand::lit(3), Operand::lit(4));
        b.move_to(b0, "x", Operand::temp(sum));
        b.write(b0, Operand::name("x"));
        b.ret(b0, None);

        let (program, _table) = b.finish().unwrap();
        assert_eq!(vec![b0], program.roots);
        assert_eq!(vec![b0], program.exits);
        assert_eq!(4, program.live_instrs(b0).len());
    }

    #[test]
    fn call_to_unknown_function_is_fatal() {
        let mut b = ProgramBuilder::new();
        let b0 = b.block();
        b.call(b0, "missing", vec![Operand::lit(1)]);
        b.ret(b0, None);

        assert_eq!(
            Err(CompileError::UnknownFunction {
                name: "missing".to_string(),
                arity: 1
            }),
            b.finish().map(|_| ())
        );
    }

    #[test]
    fn function_entry_is_first_block_in_scope() {
        let mut b = ProgramBuilder::new();
        let f = b.function("id", Type::Int, &["n"]);
        b.begin_function(f);
        let fb = b.block();
        b.ret(fb, Some(Operand::name("n")));
        b.end_function();

        let b0 = b.block();
        let call = b.call(b0, "id", vec![Operand::lit(9)]);
        b.write(b0, Operand::temp(call));
        b.ret(b0, None);

        let (program, table) = b.finish().unwrap();
        assert_eq!(fb, table.function(f).entry());
        assert_eq!(vec![fb, b0], program.roots);
        assert_eq!(Some(fb), program.instr(call).call_target);
    }
}
