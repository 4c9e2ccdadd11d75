//! Randomised checks that the optimizers preserve behaviour, using the
//! interpreter as the oracle.

use crate::bfir::{parse, Instruction, Opcode};
use crate::codegen::Target;
use crate::execution::{execute_with, ExecutionConfig, ExecutionState, Outcome, WordWidth};
use crate::loops;
use crate::peephole::{optimize, optimize_to_fixpoint};
use quickcheck::{Arbitrary, Gen, QuickCheck, TestResult};

const INPUT: &[u8] = b"quickcheck";

/// A well bracketed program of at most a few dozen instructions.
#[derive(Debug, Clone)]
struct Program(String);

impl Arbitrary for Program {
    fn arbitrary<G: Gen>(g: &mut G) -> Self {
        let len = usize::arbitrary(g) % 40;
        let mut source = String::with_capacity(len);
        let mut open = 0;
        for _ in 0..len {
            let symbol = match u8::arbitrary(g) % 12 {
                0 | 1 => '+',
                2 | 3 | 4 => '-',
                5 => '>',
                6 => '<',
                7 => '.',
                8 => ',',
                9 | 10 if open < 3 => {
                    open += 1;
                    '['
                }
                _ if open > 0 => {
                    open -= 1;
                    ']'
                }
                _ => '+',
            };
            source.push(symbol);
        }
        source.extend(std::iter::repeat(']').take(open));
        Program(source)
    }
}

impl Program {
    fn instructions(&self) -> Vec<Instruction> {
        parse(&self.0).unwrap()
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Observed {
    output: Vec<u8>,
    tape: Vec<u32>,
    pointer: isize,
}

/// Run on a small tape with the pointer in the middle. `None` if the
/// program strays off the tape or runs out of steps.
fn observe(instrs: &[Instruction]) -> Option<Observed> {
    let config = ExecutionConfig {
        tape_size: 64,
        word_width: WordWidth::Bits8,
        max_steps: Some(10_000),
    };
    let mut state = ExecutionState::new(&config);
    state.pointer = 32;

    let mut output = vec![];
    let state = execute_with(instrs, &config, state, &mut &INPUT[..], &mut output).ok()?;
    match state.outcome {
        Outcome::Completed => Some(Observed {
            output,
            tape: state.tape,
            pointer: state.pointer,
        }),
        Outcome::OutOfSteps => None,
    }
}

fn equivalent(original: &[Instruction], optimized: &[Instruction]) -> TestResult {
    match (observe(original), observe(optimized)) {
        (Some(expected), Some(actual)) => TestResult::from_bool(expected == actual),
        _ => TestResult::discard(),
    }
}

fn check(property: fn(Program) -> TestResult) {
    QuickCheck::new()
        .tests(500)
        .max_tests(20_000)
        .quickcheck(property);
}

#[test]
fn peephole_preserves_behaviour() {
    fn property(program: Program) -> TestResult {
        let instrs = program.instructions();
        equivalent(&instrs, &optimize_to_fixpoint(&instrs))
    }
    check(property);
}

#[test]
fn single_peephole_pass_preserves_behaviour() {
    fn property(program: Program) -> TestResult {
        let instrs = program.instructions();
        equivalent(&instrs, &optimize(&instrs))
    }
    check(property);
}

#[test]
fn loop_rewrites_preserve_behaviour() {
    // DIV assumes the counter divides evenly, which random tapes break.
    fn property(program: Program) -> TestResult {
        let instrs = program.instructions();
        let reduced = optimize_to_fixpoint(&instrs);
        let mut results = vec![];
        for target in &[Target::Qbe, Target::C] {
            let rewritten = loops::optimize(&reduced, *target).unwrap();
            if rewritten.iter().any(|i| i.opcode == Opcode::Div) {
                return TestResult::discard();
            }
            let result = equivalent(&instrs, &rewritten);
            if result.is_failure() {
                return result;
            }
            results.push(result);
        }
        results.pop().unwrap_or_else(TestResult::discard)
    }
    check(property);
}

#[test]
fn peephole_reaches_fixpoint() {
    fn property(program: Program) -> bool {
        let instrs = optimize_to_fixpoint(&program.instructions());
        optimize(&instrs) == instrs
    }
    QuickCheck::new()
        .tests(500)
        .quickcheck(property as fn(Program) -> bool);
}

#[test]
fn loop_rewrites_are_idempotent() {
    fn property(program: Program) -> bool {
        let reduced = optimize_to_fixpoint(&program.instructions());
        [Target::Qbe, Target::C, Target::Js].iter().all(|target| {
            let once = loops::optimize(&reduced, *target).unwrap();
            let twice = loops::optimize(&once, *target).unwrap();
            once == twice
        })
    }
    QuickCheck::new()
        .tests(500)
        .quickcheck(property as fn(Program) -> bool);
}

#[test]
fn generated_programs_parse() {
    fn property(program: Program) -> bool {
        parse(&program.0).is_ok()
    }
    QuickCheck::new()
        .tests(200)
        .quickcheck(property as fn(Program) -> bool);
}
