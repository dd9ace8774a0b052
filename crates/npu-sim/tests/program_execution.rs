// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end microcode execution against the golden integer model.
//!
//! Every expectation here is computed with plain integer arithmetic —
//! no pipeline or handshake modeling — and compared bit-exact against
//! what the device wrote back to SRAM.

use npu_isa::instr::flags;
use npu_isa::{Instruction, MicrocodeProgram, Opcode};
use npu_sim::{golden, run_until_done, Npu, NpuError, DEFAULT_CYCLE_BUDGET};

const UCODE_BASE: usize = 0xF600;

fn run_program(npu: &mut Npu, program: &MicrocodeProgram) -> u64 {
    npu.load_microcode(program, UCODE_BASE).expect("image fits");
    npu.start_program(UCODE_BASE as u32, program.len() as u32);
    run_until_done(npu, DEFAULT_CYCLE_BUDGET).expect("program must finish in budget")
}

#[test]
fn nop_program_reaches_done() {
    let mut program = MicrocodeProgram::new();
    program.push(Instruction::of(Opcode::Nop)).end();

    let mut npu = Npu::new();
    let cycles = run_program(&mut npu, &program);
    assert!(cycles < 10, "NOP+END took {cycles} cycles");
}

#[test]
fn done_holds_until_next_start() {
    let mut program = MicrocodeProgram::new();
    program.end();

    let mut npu = Npu::new();
    run_program(&mut npu, &program);
    for _ in 0..32 {
        npu.tick();
        assert!(npu.done(), "done must latch until the next start");
    }

    // A second start clears done, then completion re-asserts it.
    npu.start_program(UCODE_BASE as u32, program.len() as u32);
    run_until_done(&mut npu, DEFAULT_CYCLE_BUDGET).expect("second run");
    assert!(npu.done());
}

#[test]
fn missing_end_stalls_until_timeout() {
    let mut program = MicrocodeProgram::new();
    program.push(Instruction::of(Opcode::Nop));
    assert!(!program.is_terminated());

    let mut npu = Npu::new();
    npu.load_microcode(&program, UCODE_BASE).unwrap();
    npu.start_program(UCODE_BASE as u32, program.len() as u32);

    match run_until_done(&mut npu, 200) {
        Err(NpuError::Timeout { cycles }) => assert_eq!(cycles, 200),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[test]
fn barrier_and_unknown_opcodes_retire() {
    let mut program = MicrocodeProgram::new();
    program
        .push(Instruction::of(Opcode::Barrier))
        .push(Instruction {
            opcode: 0x42,
            ..Instruction::default()
        })
        .end();

    let mut npu = Npu::new();
    run_program(&mut npu, &program);
}

#[test]
fn gemm_writes_golden_product() {
    let a = [1i8, 2, 3, 4]; // [2,2] row-major
    let b = [5i8, 6, 7, 8];
    let expected = golden::gemm(&a, &b, 2, 2, 2);

    let mut npu = Npu::new();
    npu.write_sram(0x1000, &to_bytes(&a)).unwrap();
    npu.write_sram(0x1100, &to_bytes(&b)).unwrap();

    let mut program = MicrocodeProgram::new();
    program
        .push(Instruction {
            opcode: Opcode::Gemm.to_byte(),
            dst: 0x1200,
            src0: 0x1000,
            src1: 0x1100,
            m: 2,
            n: 2,
            k: 2,
            ..Instruction::default()
        })
        .end();
    run_program(&mut npu, &program);

    let out = npu.read_sram(0x1200, 16);
    let got: Vec<i32> = out
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    assert_eq!(got, expected);
}

#[test]
fn gemm_full_grid_matches_golden() {
    let mut a = [0i8; 256];
    let mut b = [0i8; 256];
    for i in 0..16 {
        for j in 0..16 {
            a[i * 16 + j] = ((i + j) % 5) as i8 - 2;
            b[i * 16 + j] = ((i * 3 + j * 2) % 7) as i8 - 3;
        }
    }
    let expected = golden::gemm(&a, &b, 16, 16, 16);

    let mut npu = Npu::new();
    npu.write_sram(0x1000, &to_bytes(&a)).unwrap();
    npu.write_sram(0x1100, &to_bytes(&b)).unwrap();

    let mut program = MicrocodeProgram::new();
    program
        .push(Instruction {
            opcode: Opcode::Gemm.to_byte(),
            dst: 0x2000,
            src0: 0x1000,
            src1: 0x1100,
            m: 16,
            n: 16,
            k: 16,
            ..Instruction::default()
        })
        .end();
    run_program(&mut npu, &program);

    let out = npu.read_sram(0x2000, 256 * 4);
    for (idx, chunk) in out.chunks_exact(4).enumerate() {
        let got = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        assert_eq!(got, expected[idx], "C[{}][{}]", idx / 16, idx % 16);
    }
}

#[test]
fn vec_add_control_path_and_stale_datapath() {
    let a = [10i8, 20, 30];
    let b = [1i8, 2, 3];

    let mut npu = Npu::new();
    npu.write_sram(0x100, &to_bytes(&a)).unwrap();
    npu.write_sram(0x200, &to_bytes(&b)).unwrap();

    let mut program = MicrocodeProgram::new();
    program
        .push(Instruction {
            opcode: Opcode::VecAdd.to_byte(),
            dst: 0x300,
            src0: 0x100,
            src1: 0x200,
            imm: 3,
            ..Instruction::default()
        })
        .end();
    run_program(&mut npu, &program);

    // Three pulses, one per pair, in input order; the datapath lags
    // the control path by one stage, so pulse i carries pair i-1.
    let out = npu.read_sram(0x300, 3);
    assert_eq!(out, &[0, 11, 22]);
}

#[test]
fn gelu_partial_drain_through_microcode() {
    let inputs = [-2i8, -1, 3, 7];

    let mut npu = Npu::new();
    npu.write_sram(0x100, &to_bytes(&inputs)).unwrap();
    // Canary just past the output region: partial drain writes
    // num_elements - 1 bytes, never more.
    npu.write_sram(0x200 + 3, &[0x5A]).unwrap();

    let mut program = MicrocodeProgram::new();
    program
        .push(Instruction {
            opcode: Opcode::Gelu.to_byte(),
            dst: 0x200,
            src0: 0x100,
            imm: 4,
            ..Instruction::default()
        })
        .end();
    run_program(&mut npu, &program);

    let out = npu.read_sram(0x200, 4);
    for (i, &x) in inputs.iter().take(3).enumerate() {
        assert_eq!(out[i] as i8, golden::gelu_i8(x), "element {i}");
    }
    assert_eq!(out[3], 0x5A, "dropped in-flight sample must not land");
}

#[test]
fn layernorm_emits_single_sample() {
    let window = [-2i8, -1, 1, 2];
    let mut params = Vec::new();
    for _ in 0..4 {
        params.push(127u8); // gamma ~1.0 Q7
        params.push(0u8); // beta
    }

    let mut npu = Npu::new();
    npu.write_sram(0x100, &to_bytes(&window)).unwrap();
    npu.write_sram(0x180, &params).unwrap();
    npu.write_sram(0x200 + 1, &[0x5A]).unwrap();

    let mut program = MicrocodeProgram::new();
    program
        .push(Instruction {
            opcode: Opcode::LayerNorm.to_byte(),
            dst: 0x200,
            src0: 0x100,
            src1: 0x180,
            m: 4,
            ..Instruction::default()
        })
        .end();
    run_program(&mut npu, &program);

    let expected = golden::layernorm(&window, &[127; 4], &[0; 4]);
    let out = npu.read_sram(0x200, 2);
    assert_eq!(out[0] as i8, expected[0], "position-0 sample");
    assert_eq!(out[1], 0x5A, "exactly one sample per session");
}

#[test]
fn softmax_with_and_without_causal_mask() {
    let scores = [1i8, 2, 3, 4]; // {{1,2},{3,4}}

    for causal in [false, true] {
        let mut npu = Npu::new();
        npu.write_sram(0x100, &to_bytes(&scores)).unwrap();

        let mut program = MicrocodeProgram::new();
        program
            .push(Instruction {
                opcode: Opcode::Softmax.to_byte(),
                flags: if causal { flags::CAUSAL_MASK } else { 0 },
                dst: 0x200,
                src0: 0x100,
                m: 2,
                ..Instruction::default()
            })
            .end();
        run_program(&mut npu, &program);

        let limit = |r: usize| causal.then_some(r);
        let expected = [
            golden::softmax_row(&scores[0..2], limit(0)),
            golden::softmax_row(&scores[2..4], limit(1)),
        ]
        .concat();
        let out: Vec<i8> = npu.read_sram(0x200, 4).iter().map(|&b| b as i8).collect();
        assert_eq!(out, expected, "causal={causal}");
    }
}

#[test]
fn dma_round_trip() {
    let payload = [0xDEu8, 0xAD, 0xBE, 0xEF, 0x42];

    let mut npu = Npu::new();
    npu.write_ext_mem(0x40, &payload).unwrap();

    let mut program = MicrocodeProgram::new();
    program
        .push(Instruction {
            opcode: Opcode::DmaLoad.to_byte(),
            dst: 0x800,
            src0: 0x40,
            imm: payload.len() as u16,
            ..Instruction::default()
        })
        .push(Instruction {
            opcode: Opcode::DmaStore.to_byte(),
            dst: 0x80,
            src0: 0x800,
            imm: payload.len() as u16,
            ..Instruction::default()
        })
        .end();
    run_program(&mut npu, &program);

    assert_eq!(npu.read_sram(0x800, payload.len()), &payload);
    assert_eq!(npu.read_ext_mem(0x80, payload.len()), &payload);
}

#[test]
fn back_to_back_engine_sessions() {
    // Two vector sessions in one program: dispatch is serialized, the
    // second session must start from a clean engine.
    let a = [1i8, 2];
    let b = [3i8, 4];

    let mut npu = Npu::new();
    npu.write_sram(0x100, &to_bytes(&a)).unwrap();
    npu.write_sram(0x200, &to_bytes(&b)).unwrap();

    let vec_add = |dst: u16| Instruction {
        opcode: Opcode::VecAdd.to_byte(),
        dst,
        src0: 0x100,
        src1: 0x200,
        imm: 2,
        ..Instruction::default()
    };
    let mut program = MicrocodeProgram::new();
    program.push(vec_add(0x300)).push(vec_add(0x310)).end();
    run_program(&mut npu, &program);

    assert_eq!(npu.read_sram(0x300, 2), npu.read_sram(0x310, 2));
    assert_eq!(npu.read_sram(0x300, 2), &[0, 4]); // stale-by-one: reset, 1+3
}

fn to_bytes(vals: &[i8]) -> Vec<u8> {
    vals.iter().map(|&v| v as u8).collect()
}
