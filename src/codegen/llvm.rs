//! LLVM IR backend with DWARF debug metadata, so a debugger can step
//! through the BF source.
//!
//! The fixed metadata nodes (compile unit, file, types, `main`) always
//! take the first numbers. Per instruction `DILocation`s, per loop
//! `DILexicalBlock`s and `llvm.loop` nodes are numbered after them as
//! they are created, so no forward reference needs patching later.

use super::{describe, unbalanced_warning, CodegenOptions, EmitError, Target};
use crate::bfir::{Instruction, Opcode};
use crate::diagnostics::{Position, Warning};
use crate::execution::WordWidth;
use itertools::Itertools;
use std::io::Write;

const PRODUCER: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

const GLOBAL_EXPR: usize = 0;
const GLOBAL_VAR: usize = 1;
const COMPILE_UNIT: usize = 2;
const FILE: usize = 3;
const GLOBALS: usize = 4;
const TAPE_TYPE: usize = 5;
const CELL_TYPE: usize = 6;
const TAPE_ELEMENTS: usize = 7;
const TAPE_RANGE: usize = 8;
const DWARF_VERSION: usize = 9;
const DEBUG_INFO_VERSION: usize = 10;
const IDENT: usize = 11;
const MAIN: usize = 12;
const MAIN_TYPE: usize = 13;
const MAIN_TYPES: usize = 14;
const EMPTY: usize = 15;
const INT_TYPE: usize = 16;
const POINTER_VAR: usize = 17;
const POINTER_TYPE: usize = 18;
const MUST_PROGRESS: usize = 19;
const FIXED_NODES: usize = 20;

/// A loop whose body is being emitted.
struct OpenLoop {
    label: isize,
    start_location: usize,
}

struct Generator<'a> {
    out: &'a mut dyn Write,
    options: &'a CodegenOptions,
    bits: u32,
    /// Metadata nodes numbered from `FIXED_NODES` upwards.
    metadata: Vec<String>,
    /// Lexical scopes, innermost last. `main` is at the bottom.
    scopes: Vec<usize>,
    loops: Vec<OpenLoop>,
    location: usize,
    temp: usize,
}

impl<'a> Generator<'a> {
    fn new(out: &'a mut dyn Write, options: &'a CodegenOptions) -> Self {
        Generator {
            out,
            options,
            bits: options.word_width.bits(),
            metadata: vec![],
            scopes: vec![MAIN],
            loops: vec![],
            location: 0,
            temp: 0,
        }
    }

    fn next_node(&self) -> usize {
        FIXED_NODES + self.metadata.len()
    }

    fn add_node(&mut self, node: String) -> usize {
        let id = self.next_node();
        self.metadata.push(node);
        id
    }

    fn scope(&self) -> usize {
        self.scopes.last().copied().unwrap_or(MAIN)
    }

    /// Make `position` the location attached to the following lines.
    fn locate(&mut self, position: Option<Position>) -> usize {
        let position = position.unwrap_or_default();
        let scope = self.scope();
        self.location = self.add_node(format!(
            "!DILocation(line: {}, column: {}, scope: !{})",
            position.line, position.column, scope
        ));
        self.location
    }

    fn temp(&mut self) -> String {
        self.temp += 1;
        format!("%t{}", self.temp)
    }

    /// An instruction line, tagged with the current location.
    fn line(&mut self, text: &str) -> Result<(), EmitError> {
        writeln!(self.out, "  {}, !dbg !{}", text, self.location)?;
        Ok(())
    }

    fn label(&mut self, name: &str) -> Result<(), EmitError> {
        writeln!(self.out)?;
        writeln!(self.out, "{}:", name)?;
        Ok(())
    }

    /// `value` truncated to the cell width and printed as iN accepts it.
    fn constant(&self, value: isize) -> i64 {
        let value = i64::from(self.options.word_width.truncate(value));
        if value >= 1 << (self.bits - 1) {
            value - (1 << self.bits)
        } else {
            value
        }
    }

    /// Load `%p` and, if `offset` is non-zero, step it. Returns the
    /// register holding the cell address.
    fn address(&mut self, offset: isize) -> Result<String, EmitError> {
        let base = self.temp();
        self.line(&format!("{} = load ptr, ptr %p, align 8", base))?;
        if offset == 0 {
            return Ok(base);
        }
        let addr = self.temp();
        self.line(&format!(
            "{} = getelementptr inbounds i{}, ptr {}, i64 {}",
            addr, self.bits, base, offset
        ))?;
        Ok(addr)
    }

    fn load(&mut self, addr: &str) -> Result<String, EmitError> {
        let value = self.temp();
        self.line(&format!(
            "{} = load i{}, ptr {}, align 1",
            value, self.bits, addr
        ))?;
        Ok(value)
    }

    fn store(&mut self, value: &str, addr: &str) -> Result<(), EmitError> {
        self.line(&format!(
            "store i{} {}, ptr {}, align 1",
            self.bits, value, addr
        ))
    }

    /// Branch to `nonzero` or `zero` on the current cell.
    fn branch_on_cell(&mut self, nonzero: &str, zero: &str) -> Result<(), EmitError> {
        let addr = self.address(0)?;
        let value = self.load(&addr)?;
        let test = self.temp();
        self.line(&format!("{} = icmp ne i{} {}, 0", test, self.bits, value))?;
        self.line(&format!(
            "br i1 {}, label %{}, label %{}",
            test, nonzero, zero
        ))
    }

    fn open_loop(&mut self, instr: &Instruction) -> Result<(), EmitError> {
        let label = instr.value;
        let start_location = self.locate(instr.position);
        self.line(&format!("br label %loop{}.head", label))?;

        let position = instr.position.unwrap_or_default();
        let block = self.add_node(format!(
            "distinct !DILexicalBlock(scope: !{}, file: !{}, line: {}, column: {})",
            self.scope(),
            FILE,
            position.line,
            position.column
        ));
        self.scopes.push(block);
        self.loops.push(OpenLoop {
            label,
            start_location,
        });

        self.label(&format!("loop{}.head", label))?;
        self.branch_on_cell(&format!("loop{}.body", label), &format!("loop{}.exit", label))?;
        self.label(&format!("loop{}.body", label))
    }

    fn close_loop(&mut self, position: Option<Position>) -> Result<(), EmitError> {
        let open = match self.loops.pop() {
            Some(open) => open,
            None => return Ok(()),
        };
        self.scopes.pop();

        let end_location = self.locate(position);
        let id = self.next_node();
        self.add_node(format!(
            "distinct !{{!{}, !{}, !{}, !{}}}",
            id, open.start_location, end_location, MUST_PROGRESS
        ));
        self.line(&format!(
            "br label %loop{}.head, !llvm.loop !{}",
            open.label, id
        ))?;
        self.label(&format!("loop{}.exit", open.label))
    }

    fn instruction(&mut self, instr: &Instruction) -> Result<(), EmitError> {
        if self.options.comments {
            writeln!(self.out, "  ; {}", describe(instr))?;
        }

        let n = instr.value;
        match instr.opcode {
            Opcode::JumpForward => return self.open_loop(instr),
            Opcode::JumpBack => return self.close_loop(instr.position),
            Opcode::ScanRight | Opcode::ScanLeft | Opcode::Print => {
                return Err(EmitError::unsupported(Target::Llvm, instr));
            }
            Opcode::Div if instr.offset != 0 => {
                return Err(EmitError::unsupported(Target::Llvm, instr));
            }
            _ => {}
        }

        self.locate(instr.position);
        match instr.opcode {
            Opcode::Add | Opcode::Sub => {
                let amount = match instr.opcode {
                    Opcode::Sub => self.constant(n.wrapping_neg()),
                    _ => self.constant(n),
                };
                let addr = self.address(0)?;
                let value = self.load(&addr)?;
                let sum = self.temp();
                self.line(&format!("{} = add i{} {}, {}", sum, self.bits, value, amount))?;
                self.store(&sum, &addr)?;
            }
            Opcode::IncPtr | Opcode::DecPtr => {
                let delta = instr.pointer_delta().unwrap_or(0);
                let addr = self.address(delta)?;
                self.line(&format!("store ptr {}, ptr %p, align 8", addr))?;
            }
            Opcode::Out => {
                for _ in 0..n {
                    let addr = self.address(0)?;
                    let value = self.load(&addr)?;
                    let wide = self.extend(&value)?;
                    let result = self.temp();
                    self.line(&format!(
                        "{} = call i32 @putchar(i32 noundef {})",
                        result, wide
                    ))?;
                }
            }
            Opcode::In => {
                // EOF leaves the cell alone.
                for _ in 0..n {
                    let read = self.temp();
                    self.line(&format!("{} = call i32 @getchar()", read))?;
                    let eof = self.temp();
                    self.line(&format!("{} = icmp slt i32 {}, 0", eof, read))?;
                    let byte = self.truncate(&read)?;
                    let addr = self.address(0)?;
                    let old = self.load(&addr)?;
                    let value = self.temp();
                    self.line(&format!(
                        "{} = select i1 {}, i{} {}, i{} {}",
                        value, eof, self.bits, old, self.bits, byte
                    ))?;
                    self.store(&value, &addr)?;
                }
            }
            Opcode::Mul if n == -1 && instr.offset == 0 => {
                let addr = self.address(0)?;
                self.store("0", &addr)?;
            }
            Opcode::Mul => {
                let addr = self.address(0)?;
                let source = self.load(&addr)?;
                let target = self.temp();
                self.line(&format!(
                    "{} = getelementptr inbounds i{}, ptr {}, i64 {}",
                    target, self.bits, addr, instr.offset
                ))?;
                let old = self.load(&target)?;
                let product = self.temp();
                self.line(&format!(
                    "{} = mul i{} {}, {}",
                    product,
                    self.bits,
                    source,
                    self.constant(n)
                ))?;
                let sum = self.temp();
                self.line(&format!("{} = add i{} {}, {}", sum, self.bits, old, product))?;
                self.store(&sum, &target)?;
            }
            Opcode::Div => {
                let addr = self.address(0)?;
                let value = self.load(&addr)?;
                let quotient = self.temp();
                self.line(&format!(
                    "{} = udiv i{} {}, {}",
                    quotient,
                    self.bits,
                    value,
                    self.constant(n)
                ))?;
                self.store(&quotient, &addr)?;
            }
            Opcode::BranchZero => {
                self.branch_on_cell(&format!("guard{}.body", n), &format!("guard{}.end", n))?;
                self.label(&format!("guard{}.body", n))?;
            }
            Opcode::Label => {
                self.line(&format!("br label %guard{}.end", n))?;
                self.label(&format!("guard{}.end", n))?;
            }
            Opcode::Mov => {
                let addr = self.address(instr.offset)?;
                let value = self.constant(n).to_string();
                self.store(&value, &addr)?;
            }
            Opcode::JumpForward
            | Opcode::JumpBack
            | Opcode::ScanRight
            | Opcode::ScanLeft
            | Opcode::Print => {
                return Err(EmitError::unsupported(Target::Llvm, instr));
            }
        }
        Ok(())
    }

    fn extend(&mut self, value: &str) -> Result<String, EmitError> {
        if self.bits == 32 {
            return Ok(value.to_owned());
        }
        let wide = self.temp();
        self.line(&format!("{} = zext i{} {} to i32", wide, self.bits, value))?;
        Ok(wide)
    }

    fn truncate(&mut self, value: &str) -> Result<String, EmitError> {
        if self.bits == 32 {
            return Ok(value.to_owned());
        }
        let narrow = self.temp();
        self.line(&format!("{} = trunc i32 {} to i{}", narrow, value, self.bits))?;
        Ok(narrow)
    }

    fn fixed_metadata(&self) -> Vec<String> {
        let options = self.options;
        let (directory, filename) = split_path(&options.source_name);
        let cell_name = match options.word_width {
            WordWidth::Bits8 => "uint8_t",
            WordWidth::Bits16 => "uint16_t",
            WordWidth::Bits32 => "uint32_t",
        };

        vec![
            format!("!DIGlobalVariableExpression(var: !{}, expr: !DIExpression())", GLOBAL_VAR),
            format!(
                "distinct !DIGlobalVariable(name: \"mem\", scope: !{}, file: !{}, line: 1, type: !{}, isLocal: false, isDefinition: true)",
                COMPILE_UNIT, FILE, TAPE_TYPE
            ),
            format!(
                "distinct !DICompileUnit(language: DW_LANG_C, file: !{}, producer: \"{}\", isOptimized: false, runtimeVersion: 0, emissionKind: FullDebug, globals: !{}, splitDebugInlining: false, nameTableKind: None)",
                FILE, PRODUCER, GLOBALS
            ),
            format!("!DIFile(filename: \"{}\", directory: \"{}\")", filename, directory),
            format!("!{{!{}}}", GLOBAL_EXPR),
            format!(
                "!DICompositeType(tag: DW_TAG_array_type, baseType: !{}, size: {}, elements: !{})",
                CELL_TYPE,
                options.memory_size * self.bits as usize,
                TAPE_ELEMENTS
            ),
            format!(
                "!DIBasicType(name: \"{}\", size: {}, encoding: DW_ATE_unsigned)",
                cell_name, self.bits
            ),
            format!("!{{!{}}}", TAPE_RANGE),
            format!("!DISubrange(count: {})", options.memory_size),
            "!{i32 7, !\"Dwarf Version\", i32 4}".to_owned(),
            "!{i32 2, !\"Debug Info Version\", i32 3}".to_owned(),
            format!("!{{!\"{}\"}}", PRODUCER),
            format!(
                "distinct !DISubprogram(name: \"main\", scope: !{}, file: !{}, line: 1, type: !{}, scopeLine: 1, spFlags: DISPFlagDefinition, unit: !{}, retainedNodes: !{})",
                FILE, FILE, MAIN_TYPE, COMPILE_UNIT, EMPTY
            ),
            format!("!DISubroutineType(types: !{})", MAIN_TYPES),
            format!("!{{!{}}}", INT_TYPE),
            "!{}".to_owned(),
            "!DIBasicType(name: \"int\", size: 32, encoding: DW_ATE_signed)".to_owned(),
            format!(
                "!DILocalVariable(name: \"p\", scope: !{}, file: !{}, line: 1, type: !{})",
                MAIN, FILE, POINTER_TYPE
            ),
            format!(
                "!DIDerivedType(tag: DW_TAG_pointer_type, baseType: !{}, size: 64)",
                CELL_TYPE
            ),
            "!{!\"llvm.loop.mustprogress\"}".to_owned(),
        ]
    }

    fn run(mut self, instrs: &[Instruction]) -> Result<Vec<Warning>, EmitError> {
        let name = &self.options.source_name;
        writeln!(self.out, "; ModuleID = '{}'", name)?;
        writeln!(self.out, "source_filename = \"{}\"", name)?;
        writeln!(self.out)?;
        writeln!(
            self.out,
            "@mem = global [{} x i{}] zeroinitializer, align 16, !dbg !{}",
            self.options.memory_size, self.bits, GLOBAL_EXPR
        )?;
        writeln!(self.out)?;
        writeln!(self.out, "define i32 @main() #0 !dbg !{} {{", MAIN)?;
        writeln!(self.out, "entry:")?;

        self.locate(Some(Position::new(1, 1)));
        writeln!(self.out, "  %p = alloca ptr, align 8")?;
        self.line(&format!(
            "call void @llvm.dbg.declare(metadata ptr %p, metadata !{}, metadata !DIExpression())",
            POINTER_VAR
        ))?;
        self.line("store ptr @mem, ptr %p, align 8")?;

        for instr in instrs {
            self.instruction(instr)?;
        }

        let mut warnings = vec![];
        if !self.loops.is_empty() {
            warnings.push(unbalanced_warning());
            while !self.loops.is_empty() {
                self.close_loop(None)?;
            }
        }

        self.line("ret i32 0")?;
        writeln!(self.out, "}}")?;
        writeln!(self.out)?;
        writeln!(
            self.out,
            "declare void @llvm.dbg.declare(metadata, metadata, metadata) #1"
        )?;
        writeln!(self.out, "declare i32 @getchar()")?;
        writeln!(self.out, "declare i32 @putchar(i32 noundef)")?;
        writeln!(self.out)?;
        writeln!(self.out, "attributes #0 = {{ noinline nounwind optnone }}")?;
        writeln!(
            self.out,
            "attributes #1 = {{ nocallback nofree nosync nounwind readnone speculatable willreturn }}"
        )?;
        writeln!(self.out)?;
        writeln!(
            self.out,
            "!llvm.module.flags = !{{!{}, !{}}}",
            DWARF_VERSION, DEBUG_INFO_VERSION
        )?;
        writeln!(self.out, "!llvm.dbg.cu = !{{!{}}}", COMPILE_UNIT)?;
        writeln!(self.out, "!llvm.ident = !{{!{}}}", IDENT)?;
        writeln!(self.out)?;

        let nodes = self
            .fixed_metadata()
            .into_iter()
            .chain(self.metadata.drain(..))
            .enumerate()
            .map(|(id, node)| format!("!{} = {}", id, node))
            .join("\n");
        writeln!(self.out, "{}", nodes)?;
        Ok(warnings)
    }
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(index) => (&path[..index], &path[index + 1..]),
        None => (".", path),
    }
}

pub fn emit(
    instrs: &[Instruction],
    options: &CodegenOptions,
    out: &mut dyn Write,
) -> Result<Vec<Warning>, EmitError> {
    Generator::new(out, options).run(instrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfir::parse;
    use crate::codegen::emit_to_string;

    fn emit_source(source: &str) -> String {
        let instrs = parse(source).unwrap();
        emit_to_string(Target::Llvm, &instrs, &CodegenOptions::default())
            .unwrap()
            .0
    }

    #[test]
    fn metadata_numbers_are_dense() {
        let text = emit_source("+[-]>.");
        let ids: Vec<usize> = text
            .lines()
            .filter(|line| line.starts_with('!') && line.contains(" = "))
            .filter_map(|line| line[1..line.find(' ').unwrap()].parse().ok())
            .collect();
        assert_eq!(ids, (0..ids.len()).collect::<Vec<_>>());
        assert!(ids.len() > FIXED_NODES);
    }

    #[test]
    fn loops_get_loop_metadata() {
        let text = emit_source("+[-]");
        assert!(text.contains("br label %loop1.head, !llvm.loop !"));
        assert!(text.contains("loop1.exit:"));
        assert!(text.contains(&format!(", !{}}}", MUST_PROGRESS)));
        assert!(text.contains("distinct !DILexicalBlock(scope: !12, file: !3, line: 1, column: 2)"));
    }

    #[test]
    fn sub_uses_signed_constant() {
        let instrs = vec![Instruction::new(Opcode::Sub, 3)];
        let (text, _) =
            emit_to_string(Target::Llvm, &instrs, &CodegenOptions::default()).unwrap();
        assert!(text.contains("= add i8 %t2, -3, !dbg"));
    }

    #[test]
    fn guard_blocks() {
        let instrs = vec![
            Instruction::new(Opcode::BranchZero, 3),
            Instruction::new(Opcode::Mul, 2).with_offset(1),
            Instruction::new(Opcode::Label, 3),
        ];
        let (text, _) =
            emit_to_string(Target::Llvm, &instrs, &CodegenOptions::default()).unwrap();
        assert!(text.contains("label %guard3.body, label %guard3.end"));
        assert!(text.contains("br label %guard3.end, !dbg"));
        assert!(text.contains("\nguard3.end:\n"));
    }

    #[test]
    fn rejects_inexpressible_opcodes() {
        let rejected = [
            Instruction::new(Opcode::ScanRight, 0),
            Instruction::new(Opcode::ScanLeft, 0),
            Instruction::new(Opcode::Print, 0),
            Instruction::new(Opcode::Div, 2).with_offset(1),
        ];
        for instr in &rejected {
            match emit_to_string(Target::Llvm, &[*instr], &CodegenOptions::default()) {
                Err(EmitError::Unsupported { target, opcode, .. }) => {
                    assert_eq!(target, Target::Llvm);
                    assert_eq!(opcode, instr.opcode);
                }
                other => panic!("expected {} to be rejected, got {:?}", instr, other),
            }
        }
    }

    #[test]
    fn every_rewritten_opcode_is_emitted() {
        let instrs = vec![
            Instruction::new(Opcode::BranchZero, 1),
            Instruction::new(Opcode::Div, 3),
            Instruction::new(Opcode::Mul, 2).with_offset(1),
            Instruction::new(Opcode::Label, 1),
            Instruction::new(Opcode::Mov, -1).with_offset(-1),
            Instruction::new(Opcode::Mul, -1),
        ];
        let (text, warnings) =
            emit_to_string(Target::Llvm, &instrs, &CodegenOptions::default()).unwrap();
        assert!(warnings.is_empty());
        assert!(text.contains("= udiv i8 "));
        assert!(text.contains("= mul i8 "));
        assert!(text.contains("store i8 -1, ptr "));
        assert!(text.contains("store i8 0, ptr "));
    }

    #[test]
    fn source_name_is_split() {
        assert_eq!(split_path("/tmp/prog.bf"), ("/tmp", "prog.bf"));
        assert_eq!(split_path("prog.bf"), (".", "prog.bf"));
    }
}
