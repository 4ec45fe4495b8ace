//! Code generation: from the optimized, register-annotated graph to a flat
//! array of machine words.
//!
//! Blocks are walked in structured control order (the if/while/repeat
//! pointers preserved from the front end), so nested constructs emit in
//! source order. Branch and call displacements are not known at emission
//! time; every such instruction is recorded in a fix-up table and resolved
//! by a final backpatch pass once the layout is final. Word 0 of the output
//! is reserved for the initial stack-pointer value and patched last.

pub mod emulator;
pub mod machine;

use std::collections::HashMap;

use log::debug;

use crate::error::{CompileError, Result};
use crate::ir::{
    BlockId, BlockKind, FuncId, InstrId, Opcode, Operand, Program, Slot, SymbolTable, Type,
    Variable,
};
use crate::regalloc::Allocation;

use machine::{
    MachineInstr, MachineOp, FP, GLOBAL, GLOBAL_OFFSET, R0, RA, SP, TEMP, TEMP_A, TEMP_B, TEMP_C,
};

pub fn generate(
    program: &Program,
    table: &SymbolTable,
    registers: usize,
    allocation: &Allocation,
) -> Result<Vec<u32>> {
    CodeGenerator::new(program, table, registers).run(allocation)
}

#[derive(Debug, Clone, Copy)]
enum FixTarget {
    /// A branch: resolved to the relative word distance to the target
    /// instruction.
    Instr(InstrId),
    /// A call: resolved to the absolute byte address of the function's
    /// frame setup.
    Entry(BlockId),
}

#[derive(Debug, Clone, Copy)]
struct Fixup {
    pc: usize,
    target: FixTarget,
}

struct CodeGenerator<'a> {
    program: &'a Program,
    table: &'a SymbolTable,
    registers: usize,
    code: Vec<MachineInstr>,
    term_pc: HashMap<InstrId, usize>,
    entry_pc: HashMap<BlockId, usize>,
    fixups: Vec<Fixup>,
    /// Byte offset of every global cell below the GLOBAL base register.
    globals: HashMap<String, i32>,
    global_words: i32,
    /// Frame-pointer-relative word offsets of the current function's
    /// scalar homes (locals, versioned names, temporaries, parameters).
    frame: HashMap<Operand, i32>,
    /// Word offsets of the current function's local array bases.
    frame_arrays: HashMap<String, i32>,
    /// Next free frame slot; slot 0 is the saved frame pointer.
    frame_size: i32,
    scope: Option<FuncId>,
}

impl<'a> CodeGenerator<'a> {
    fn new(program: &'a Program, table: &'a SymbolTable, registers: usize) -> Self {
        Self {
            program,
            table,
            registers,
            code: Vec::new(),
            term_pc: HashMap::new(),
            entry_pc: HashMap::new(),
            fixups: Vec::new(),
            globals: HashMap::new(),
            global_words: 0,
            frame: HashMap::new(),
            frame_arrays: HashMap::new(),
            frame_size: 1,
            scope: None,
        }
    }

    fn run(mut self, allocation: &Allocation) -> Result<Vec<u32>> {
        // Word 0: initial stack pointer, patched once the layout is known.
        self.push(MachineOp::Addi, SP as i32, 0, 0);

        self.layout_globals()?;

        let Some(&main) = self.program.roots.last() else {
            return Err(CompileError::malformed(0, "program has no roots"));
        };
        self.gen_root(main, allocation)?;
        for &root in &self.program.roots[..self.program.roots.len() - 1] {
            self.gen_root(root, allocation)?;
        }

        self.backpatch()?;
        self.code[0].c = self.code.len() as i32 * 4 + 4;

        debug!("codegen: {} word(s) emitted", self.code.len());
        Ok(self.code.iter().map(|instr| instr.encode()).collect())
    }

    /// Assign every global a statically computed offset from the GLOBAL
    /// base and zero-initialize the cells.
    fn layout_globals(&mut self) -> Result<()> {
        for name in self.table.globals() {
            match self.table.global_type(name) {
                Some(Type::Array) => {
                    let shape = self.table.array_shape(None, name)?;
                    let size: usize = shape.iter().product();
                    let offset = self.alloc_global(name, size as i32);
                    for word in 0..size as i32 {
                        self.push(MachineOp::Stw, R0 as i32, GLOBAL as i32, offset + 4 * word);
                    }
                }
                _ => {
                    let offset = self.alloc_global(name, 1);
                    self.push(MachineOp::Stw, R0 as i32, GLOBAL as i32, offset);
                }
            }
        }
        Ok(())
    }

    fn alloc_global(&mut self, name: &str, words: i32) -> i32 {
        let offset = -GLOBAL_OFFSET + 4 * self.global_words;
        self.global_words += words;
        self.globals.insert(name.to_string(), offset);
        offset
    }

    fn global_cell(&self, name: &str) -> Result<i32> {
        self.globals
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::UnknownVariable(name.to_string()))
    }

    fn is_global(&self, name: &str) -> bool {
        match self.scope {
            None => self.table.global_type(name).is_some(),
            Some(func) => self
                .table
                .function(func)
                .real_globals(self.table)
                .iter()
                .any(|g| g == name),
        }
    }

    fn push(&mut self, op: MachineOp, a: i32, b: i32, c: i32) -> usize {
        let pc = self.code.len();
        self.code.push(MachineInstr::new(op, a, b, c));
        pc
    }

    /// Emit one root: frame setup, zero-initialized slots for every scalar
    /// live range that lives in this frame, then the blocks in structured
    /// order.
    fn gen_root(&mut self, root: BlockId, allocation: &Allocation) -> Result<()> {
        self.scope = self.program.block(root).scope;
        self.frame.clear();
        self.frame_arrays.clear();
        self.frame_size = 1;
        self.entry_pc.insert(root, self.code.len());

        self.push(MachineOp::Addi, FP as i32, SP as i32, 0);

        let mut values: Vec<Operand> = allocation
            .root_values
            .get(&root)
            .cloned()
            .unwrap_or_default();
        values.sort_by_key(|value| value.to_string());
        self.layout_frame(&values)?;

        let mut block = Some(root);
        let mut fuel = self.program.blocks.len() + 1;
        while let Some(current) = block {
            block = self.gen_block(current)?;
            fuel -= 1;
            if fuel == 0 {
                return Err(CompileError::malformed(0, "block walk does not terminate"));
            }
        }
        Ok(())
    }

    fn layout_frame(&mut self, values: &[Operand]) -> Result<()> {
        let scope = self.scope;
        for value in values {
            match value {
                Operand::Temp(_) => self.push_frame_slot(value.clone()),
                Operand::Var(variable) => {
                    let Some(func) = scope else {
                        // Top-level named values are globals; their home is
                        // the global area.
                        continue;
                    };
                    let symbol = self.table.function(func);
                    if symbol.real_globals(self.table).iter().any(|g| g == &variable.name) {
                        continue;
                    }
                    if symbol.lookup_type(&variable.name) == Some(Type::Array) {
                        if !self.frame_arrays.contains_key(&variable.name) {
                            let shape = symbol
                                .array_shape(&variable.name)
                                .ok_or_else(|| {
                                    CompileError::UnknownVariable(variable.name.clone())
                                })?;
                            let size: i32 = shape.iter().product::<usize>() as i32;
                            self.frame_arrays
                                .insert(variable.name.clone(), self.frame_size);
                            for _ in 0..size {
                                self.push(MachineOp::Psh, R0 as i32, SP as i32, 4);
                            }
                            self.frame_size += size;
                        }
                        continue;
                    }
                    let incoming_param = variable.version == 0
                        && symbol.real_params().iter().any(|p| p == &variable.name);
                    if incoming_param {
                        // Mapped below the frame pointer instead.
                        continue;
                    }
                    self.push_frame_slot(value.clone());
                }
                Operand::Const(_) | Operand::Block(_) => {}
            }
        }

        if let Some(func) = scope {
            let params = self.table.function(func).real_params().to_vec();
            let count = params.len() as i32;
            for (index, param) in params.into_iter().enumerate() {
                self.frame.insert(
                    Operand::Var(Variable::unversioned(param)),
                    index as i32 - count - 1,
                );
            }
        }
        Ok(())
    }

    fn push_frame_slot(&mut self, value: Operand) {
        self.push(MachineOp::Psh, R0 as i32, SP as i32, 4);
        self.frame.insert(value, self.frame_size);
        self.frame_size += 1;
    }

    /// Emit the region starting at `block`, returning the next block that
    /// has not been emitted yet.
    fn gen_block(&mut self, block: BlockId) -> Result<Option<BlockId>> {
        if self.program.block(block).deleted {
            return match self.program.block(block).succs.first() {
                Some(&succ) => self.gen_block(succ),
                None => Ok(None),
            };
        }

        if let Some(repeat) = self.program.block(block).repeat {
            let compare = self.resolve(repeat.compare)?;
            let mut cursor = self.gen_sub_block(block)?;
            let mut fuel = self.program.blocks.len() + 1;
            while cursor != Some(compare) {
                let Some(next) = cursor else {
                    return Ok(None);
                };
                cursor = self.gen_block(next)?;
                fuel -= 1;
                if fuel == 0 {
                    return Err(CompileError::malformed(0, "repeat body never reaches its compare block"));
                }
            }
            self.gen_sub_block(compare)?;
            return self.gen_block(repeat.exit);
        }

        self.gen_sub_block(block)
    }

    /// Resolve a structural pointer through the soft-deleted chain, so the
    /// region loops below compare against the block that will actually be
    /// emitted.
    fn resolve(&self, block: BlockId) -> Result<BlockId> {
        self.program.live_successor(block).ok_or_else(|| {
            CompileError::malformed(block.0, "structured pointer leads into dead code")
        })
    }

    fn gen_sub_block(&mut self, block: BlockId) -> Result<Option<BlockId>> {
        if self.program.block(block).deleted {
            return match self.program.block(block).succs.first() {
                Some(&succ) => self.gen_block(succ),
                None => Ok(None),
            };
        }

        match self.program.block(block).kind {
            BlockKind::If { then, els, join } => {
                self.emit_terms(block)?;
                let join = self.resolve(join)?;
                let mut cursor = self.resolve(then)?;
                let mut fuel = self.program.blocks.len() + 1;
                while cursor != join {
                    match self.gen_block(cursor)? {
                        Some(next) => cursor = next,
                        None => return Ok(None),
                    }
                    fuel -= 1;
                    if fuel == 0 {
                        return Err(CompileError::malformed(0, "then branch never reaches its join"));
                    }
                }
                let mut cursor = self.resolve(els)?;
                let mut fuel = self.program.blocks.len() + 1;
                while cursor != join {
                    match self.gen_block(cursor)? {
                        Some(next) => cursor = next,
                        None => return Ok(None),
                    }
                    fuel -= 1;
                    if fuel == 0 {
                        return Err(CompileError::malformed(0, "else branch never reaches its join"));
                    }
                }
                self.gen_block(join)
            }
            BlockKind::While { body, exit } => {
                self.emit_terms(block)?;
                let mut cursor = self.resolve(body)?;
                let mut fuel = self.program.blocks.len() + 1;
                while cursor != block {
                    match self.gen_block(cursor)? {
                        Some(next) => cursor = next,
                        None => return Ok(None),
                    }
                    fuel -= 1;
                    if fuel == 0 {
                        return Err(CompileError::malformed(0, "loop body never returns to its header"));
                    }
                }
                self.gen_block(exit)
            }
            BlockKind::Common => {
                self.emit_terms(block)?;
                Ok(self.program.block(block).succs.first().copied())
            }
        }
    }

    fn emit_terms(&mut self, block: BlockId) -> Result<()> {
        for id in self.program.live_instrs(block) {
            self.term_pc.insert(id, self.code.len());
            self.gen_instr(id)?;
        }
        Ok(())
    }

    /// Make the value of `operand` available in a register and return that
    /// register. Literals are materialized into the scratch register;
    /// spilled values are reloaded from their home (frame slot, or global
    /// cell for globals); unversioned named values are loaded from their
    /// home into their assigned register.
    fn load_operand(
        &mut self,
        seq: InstrId,
        operand: &Operand,
        slot: Option<Slot>,
        scratch: usize,
    ) -> Result<i32> {
        match operand {
            Operand::Const(value) => {
                self.push(MachineOp::Addi, scratch as i32, R0 as i32, *value);
                Ok(scratch as i32)
            }
            Operand::Block(_) => Err(CompileError::malformed(
                seq.0,
                "branch target used as a data operand",
            )),
            Operand::Temp(_) => match slot {
                Some(Slot::Reg(color)) => Ok(color as i32 + 1),
                Some(Slot::Spill) => {
                    let offset = self.frame_slot(seq, operand)?;
                    self.push(MachineOp::Ldw, scratch as i32, FP as i32, offset * 4);
                    Ok(scratch as i32)
                }
                None => Err(CompileError::malformed(
                    seq.0,
                    format!("{} has no register", operand),
                )),
            },
            Operand::Var(variable) => {
                let spilled = slot == Some(Slot::Spill);
                let reg = match slot {
                    Some(Slot::Reg(color)) => color as i32 + 1,
                    Some(Slot::Spill) => scratch as i32,
                    None => {
                        return Err(CompileError::malformed(
                            seq.0,
                            format!("{} has no register", operand),
                        ))
                    }
                };
                if self.is_global(&variable.name) {
                    if variable.version == 0 || spilled {
                        let cell = self.global_cell(&variable.name)?;
                        self.push(MachineOp::Ldw, reg, GLOBAL as i32, cell);
                    }
                } else if variable.version == 0 || spilled {
                    let offset = self.frame_slot(seq, operand)?;
                    self.push(MachineOp::Ldw, reg, FP as i32, offset * 4);
                }
                Ok(reg)
            }
        }
    }

    fn frame_slot(&self, seq: InstrId, operand: &Operand) -> Result<i32> {
        // Unversioned parameters live below the frame pointer under their
        // unversioned key.
        self.frame
            .get(operand)
            .copied()
            .ok_or_else(|| CompileError::malformed(seq.0, format!("{} has no frame slot", operand)))
    }

    /// Register that will receive a defined value: its color, or a scratch
    /// register for spilled (and unused) definitions.
    fn output_reg(&self, slot: Option<Slot>, scratch: usize) -> i32 {
        match slot {
            Some(Slot::Reg(color)) => color as i32 + 1,
            _ => scratch as i32,
        }
    }

    /// Store a just-defined spilled value back to its home.
    fn spill_store(&mut self, seq: InstrId, operand: &Operand, reg: i32) -> Result<()> {
        match operand {
            Operand::Var(variable) if self.is_global(&variable.name) => {
                let cell = self.global_cell(&variable.name)?;
                self.push(MachineOp::Stw, reg, GLOBAL as i32, cell);
            }
            _ => {
                let offset = self.frame_slot(seq, operand)?;
                self.push(MachineOp::Stw, reg, FP as i32, offset * 4);
            }
        }
        Ok(())
    }

    fn gen_instr(&mut self, id: InstrId) -> Result<()> {
        let instr = self.program.instr(id);
        let seq = id;
        match instr.op {
            Opcode::Adda => self.gen_adda(id)?,
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Cmp => {
                self.gen_arith(id)?
            }
            Opcode::Beq | Opcode::Bne | Opcode::Blt | Opcode::Bge | Opcode::Bgt | Opcode::Ble => {
                self.gen_branch(id)?
            }
            Opcode::Bra => {
                let target = instr.branch_target().ok_or_else(|| {
                    CompileError::malformed(seq.0, "jump without target")
                })?;
                let target_instr = self
                    .program
                    .first_live_instr(target)
                    .ok_or(CompileError::MissingBranchTarget { seq: seq.0 })?;
                let pc = self.push(MachineOp::Bsr, 0, 0, 0);
                self.fixups.push(Fixup {
                    pc,
                    target: FixTarget::Instr(target_instr),
                });
            }
            Opcode::Call => self.gen_call(id)?,
            Opcode::Move => self.gen_move(id)?,
            Opcode::Ret => match self.scope {
                // A top-level return halts the machine.
                None => {
                    self.push(MachineOp::Ret, 0, 0, 0);
                }
                Some(func) => self.gen_return(id, func)?,
            },
            Opcode::Load => {
                let (src, src_slot, out) =
                    (instr.src.clone(), instr.regs.src, instr.regs.out);
                let src = src
                    .ok_or_else(|| CompileError::malformed(seq.0, "load without address"))?;
                let a = self.output_reg(out, TEMP_A);
                let b = self.load_operand(seq, &src, src_slot, TEMP_B)?;
                self.push(MachineOp::Ldw, a, b, 0);
                if out == Some(Slot::Spill) {
                    self.spill_store(seq, &Operand::temp(id), a)?;
                }
            }
            Opcode::LoadGlobal => {
                let name = instr
                    .store_name
                    .clone()
                    .ok_or_else(|| CompileError::malformed(seq.0, "reload without a global"))?;
                if let Some(Slot::Reg(color)) = instr.regs.src {
                    let cell = self.global_cell(&name)?;
                    self.push(MachineOp::Ldw, color as i32 + 1, GLOBAL as i32, cell);
                }
                // A spilled reload is a no-op: the global cell is already
                // the value's home.
            }
            Opcode::Store => {
                let (src, dst) = (instr.src.clone(), instr.dst.clone());
                let (src_slot, dst_slot) = (instr.regs.src, instr.regs.dst);
                let src =
                    src.ok_or_else(|| CompileError::malformed(seq.0, "store without value"))?;
                let dst =
                    dst.ok_or_else(|| CompileError::malformed(seq.0, "store without address"))?;
                let b = self.load_operand(seq, &src, src_slot, TEMP_B)?;
                let c = self.load_operand(seq, &dst, dst_slot, TEMP_C)?;
                self.push(MachineOp::Stw, b, c, 0);
            }
            Opcode::StoreGlobal => {
                let name = instr
                    .store_name
                    .clone()
                    .ok_or_else(|| CompileError::malformed(seq.0, "store without a global"))?;
                if self.table.global_type(&name) == Some(Type::Array) {
                    return Err(CompileError::type_violation(
                        seq.0,
                        format!("cannot store non-scalar '{}'", name),
                    ));
                }
                let src = instr
                    .src
                    .clone()
                    .ok_or_else(|| CompileError::malformed(seq.0, "store without value"))?;
                let slot = instr.regs.src;
                let self_store = matches!(
                    (&src, slot),
                    (Operand::Var(variable), Some(Slot::Spill)) if variable.name == name
                );
                // A spilled global already lives in its cell; anything else
                // (including a spilled temporary) is fetched from its own
                // home and stored.
                if !self_store {
                    let b = self.load_operand(seq, &src, slot, TEMP_B)?;
                    let cell = self.global_cell(&name)?;
                    self.push(MachineOp::Stw, b, GLOBAL as i32, cell);
                }
            }
            Opcode::Read => {
                let out = instr.regs.out;
                let a = self.output_reg(out, TEMP_A);
                self.push(MachineOp::Rdi, a, 0, 0);
                if out == Some(Slot::Spill) {
                    self.spill_store(seq, &Operand::temp(id), a)?;
                }
            }
            Opcode::Write => {
                let (src, slot) = (instr.src.clone(), instr.regs.src);
                let src =
                    src.ok_or_else(|| CompileError::malformed(seq.0, "write without value"))?;
                let b = self.load_operand(seq, &src, slot, TEMP_B)?;
                self.push(MachineOp::Wrd, 0, b, 0);
            }
            Opcode::WriteNl => {
                self.push(MachineOp::Wrl, 0, 0, 0);
            }
            Opcode::Phi => {
                return Err(CompileError::malformed(
                    seq.0,
                    "phi reached code generation",
                ))
            }
        }
        Ok(())
    }

    fn gen_arith(&mut self, id: InstrId) -> Result<()> {
        let instr = self.program.instr(id);
        let op = match instr.op {
            Opcode::Add => MachineOp::Add,
            Opcode::Sub => MachineOp::Sub,
            Opcode::Mul => MachineOp::Mul,
            Opcode::Div => MachineOp::Div,
            Opcode::Cmp => MachineOp::Cmp,
            _ => unreachable!("gen_arith on non-arithmetic opcode"),
        };
        let src = instr
            .src
            .clone()
            .ok_or_else(|| CompileError::malformed(id.0, "arithmetic without operands"))?;
        let dst = instr
            .dst
            .clone()
            .ok_or_else(|| CompileError::malformed(id.0, "arithmetic without operands"))?;
        let (src_slot, dst_slot, out) = (instr.regs.src, instr.regs.dst, instr.regs.out);

        let a = self.output_reg(out, TEMP_A);
        let b = self.load_operand(id, &src, src_slot, TEMP_B)?;
        let c = self.load_operand(id, &dst, dst_slot, TEMP_C)?;
        self.push(op, a, b, c);
        if out == Some(Slot::Spill) {
            self.spill_store(id, &Operand::temp(id), a)?;
        }
        Ok(())
    }

    fn gen_adda(&mut self, id: InstrId) -> Result<()> {
        let instr = self.program.instr(id);
        let src = instr
            .src
            .clone()
            .ok_or_else(|| CompileError::malformed(id.0, "address computation without offset"))?;
        let base = match &instr.dst {
            Some(Operand::Var(variable)) => variable.name.clone(),
            _ => {
                return Err(CompileError::type_violation(
                    id.0,
                    "indexing requires an array name",
                ))
            }
        };
        if self.table.lookup_type(self.scope, &base)? != Type::Array {
            return Err(CompileError::type_violation(
                id.0,
                format!("cannot index non-array '{}'", base),
            ));
        }
        let (src_slot, out) = (instr.regs.src, instr.regs.out);

        let a = self.output_reg(out, TEMP_A);
        let b = self.load_operand(id, &src, src_slot, TEMP_B)?;
        if self.is_global(&base) {
            let cell = self.global_cell(&base)?;
            self.push(MachineOp::Addi, TEMP_C as i32, GLOBAL as i32, cell);
        } else {
            let offset = *self.frame_arrays.get(&base).ok_or_else(|| {
                CompileError::malformed(id.0, format!("array '{}' has no frame space", base))
            })?;
            self.push(MachineOp::Addi, TEMP_C as i32, FP as i32, offset * 4);
        }
        self.push(MachineOp::Add, a, b, TEMP_C as i32);
        if out == Some(Slot::Spill) {
            self.spill_store(id, &Operand::temp(id), a)?;
        }
        Ok(())
    }

    fn gen_branch(&mut self, id: InstrId) -> Result<()> {
        let instr = self.program.instr(id);
        let op = match instr.op {
            Opcode::Beq => MachineOp::Beq,
            Opcode::Bne => MachineOp::Bne,
            Opcode::Blt => MachineOp::Blt,
            Opcode::Bge => MachineOp::Bge,
            Opcode::Bgt => MachineOp::Bgt,
            Opcode::Ble => MachineOp::Ble,
            _ => unreachable!("gen_branch on non-branch opcode"),
        };
        let target = instr
            .branch_target()
            .ok_or_else(|| CompileError::malformed(id.0, "branch without target"))?;
        let target_instr = self
            .program
            .first_live_instr(target)
            .ok_or(CompileError::MissingBranchTarget { seq: id.0 })?;
        let cond = instr
            .src
            .clone()
            .ok_or_else(|| CompileError::malformed(id.0, "branch without condition"))?;
        let slot = instr.regs.src;

        let b = self.load_operand(id, &cond, slot, TEMP_B)?;
        let pc = self.push(op, b, 0, 0);
        self.fixups.push(Fixup {
            pc,
            target: FixTarget::Instr(target_instr),
        });
        Ok(())
    }

    fn gen_move(&mut self, id: InstrId) -> Result<()> {
        let instr = self.program.instr(id);
        let src = instr
            .src
            .clone()
            .ok_or_else(|| CompileError::malformed(id.0, "move without source"))?;
        let dst = instr
            .dst
            .clone()
            .ok_or_else(|| CompileError::malformed(id.0, "move without destination"))?;
        if let Operand::Var(variable) = &dst {
            if self.table.lookup_type(self.scope, &variable.name).ok() == Some(Type::Array) {
                return Err(CompileError::type_violation(
                    id.0,
                    format!("cannot assign whole array '{}'", variable.name),
                ));
            }
        }
        let (src_slot, dst_slot) = (instr.regs.src, instr.regs.dst);

        let b = self.load_operand(id, &src, src_slot, TEMP_B)?;
        let c = self.output_reg(dst_slot, TEMP_C);
        self.push(MachineOp::Add, c, R0 as i32, b);
        if dst_slot == Some(Slot::Spill) {
            self.spill_store(id, &dst, c)?;
        }
        Ok(())
    }

    /// Caller side of the call protocol: save all general registers, push
    /// the non-shadowed arguments, compute the return address, push it with
    /// the frame pointer, jump; afterwards restore in reverse order and
    /// fetch the returned value.
    fn gen_call(&mut self, id: InstrId) -> Result<()> {
        let instr = self.program.instr(id);
        let callee = match &instr.src {
            Some(Operand::Var(variable)) => variable.name.clone(),
            _ => return Err(CompileError::malformed(id.0, "call without callee name")),
        };
        let args = instr.args.clone();
        let arg_slots = instr.regs.args.clone();
        let out = instr.regs.out;

        let func = self.table.lookup_function(&callee, args.len())?;
        let symbol = self.table.function(func);
        let entry = symbol.entry();
        let returns_value = symbol.return_type() == Type::Int;
        let real = symbol.param_real_flags();

        for reg in 1..=self.registers as i32 {
            self.push(MachineOp::Psh, reg, SP as i32, 4);
        }

        for (index, arg) in args.iter().enumerate() {
            if !real[index] {
                continue;
            }
            let slot = arg_slots.get(index).copied().flatten();
            let reg = self.load_operand(id, arg, slot, TEMP_C)?;
            self.push(MachineOp::Psh, reg, SP as i32, 4);
        }

        // The instruction after the JSR is five words from here.
        let here = self.code.len() as i32;
        self.push(MachineOp::Addi, RA as i32, R0 as i32, (here + 5) * 4);
        self.push(MachineOp::Psh, RA as i32, SP as i32, 4);
        self.push(MachineOp::Psh, FP as i32, SP as i32, 4);
        self.push(MachineOp::Addi, FP as i32, SP as i32, 0);
        let pc = self.push(MachineOp::Jsr, 0, 0, 0);
        self.fixups.push(Fixup {
            pc,
            target: FixTarget::Entry(entry),
        });

        if returns_value {
            self.push(MachineOp::Pop, TEMP as i32, SP as i32, -4);
        }
        for reg in (1..=self.registers as i32).rev() {
            self.push(MachineOp::Pop, reg, SP as i32, -4);
        }
        if returns_value {
            match out {
                Some(Slot::Reg(color)) => {
                    self.push(MachineOp::Addi, color as i32 + 1, TEMP as i32, 0);
                }
                Some(Slot::Spill) => {
                    self.push(MachineOp::Addi, TEMP_A as i32, TEMP as i32, 0);
                    self.spill_store(id, &Operand::temp(id), TEMP_A as i32)?;
                }
                // The result is never read; leave it on the scratch.
                None => {}
            }
        }
        Ok(())
    }

    /// Callee side: load the returned value, unwind the frame slots,
    /// restore SP/FP/RA, drop the incoming arguments, publish the returned
    /// value on the stack, return.
    fn gen_return(&mut self, id: InstrId, func: FuncId) -> Result<()> {
        let symbol = self.table.function(func);
        let returns_value = symbol.return_type() == Type::Int;
        let param_count = symbol.real_params().len();

        let mut value_reg = None;
        if returns_value {
            let instr = self.program.instr(id);
            let src = instr
                .src
                .clone()
                .ok_or_else(|| CompileError::malformed(id.0, "return without value"))?;
            value_reg = Some(self.load_operand(id, &src, instr.regs.src, TEMP_B)?);
        }

        for _ in 1..self.frame_size {
            self.push(MachineOp::Pop, TEMP as i32, SP as i32, -4);
        }
        self.push(MachineOp::Add, SP as i32, R0 as i32, FP as i32);
        self.push(MachineOp::Pop, FP as i32, SP as i32, -4);
        self.push(MachineOp::Pop, RA as i32, SP as i32, -4);
        for _ in 0..param_count {
            self.push(MachineOp::Pop, TEMP_C as i32, SP as i32, -4);
        }
        if let Some(reg) = value_reg {
            self.push(MachineOp::Psh, reg, SP as i32, 4);
        }
        self.push(MachineOp::Ret, 0, 0, RA as i32);
        Ok(())
    }

    /// Resolve every recorded fix-up now that each instruction's final
    /// position is known: relative word displacements for branches,
    /// absolute byte addresses for calls.
    fn backpatch(&mut self) -> Result<()> {
        for fixup in std::mem::take(&mut self.fixups) {
            match fixup.target {
                FixTarget::Instr(id) => {
                    let target = *self
                        .term_pc
                        .get(&id)
                        .ok_or(CompileError::MissingBranchTarget { seq: id.0 })?;
                    self.code[fixup.pc].c = target as i32 - fixup.pc as i32;
                }
                FixTarget::Entry(entry) => {
                    let target = *self
                        .entry_pc
                        .get(&entry)
                        .ok_or(CompileError::UnknownEntry(entry.0))?;
                    self.code[fixup.pc].c = target as i32 * 4;
                }
            }
        }
        Ok(())
    }
}
