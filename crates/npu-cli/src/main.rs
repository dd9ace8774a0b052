// SPDX-License-Identifier: AGPL-3.0-only

//! `tnpu` — command-line interface for the Tiny NPU simulator.
//!
//! ```text
//! USAGE:
//!   tnpu assemble --out prog.bin [--hex prog.hex --base 0xF600]
//!   tnpu disasm <prog.bin>            Decode a microcode image
//!   tnpu run <prog.bin> [--base N --max-cycles N]
//!   tnpu gemm                         One-shot systolic demo vs golden
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use npu_isa::{Instruction, MicrocodeProgram, Opcode};
use npu_sim::{golden, run_until_done, Npu, DEFAULT_CYCLE_BUDGET};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tnpu", about = "Tiny NPU simulator CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Assemble the built-in smoke program into a microcode image.
    Assemble {
        /// Output path for the raw binary image.
        #[arg(long)]
        out: PathBuf,
        /// Also emit a textual hex dump (one byte per line).
        #[arg(long)]
        hex: Option<PathBuf>,
        /// Zero-padding offset for the hex dump.
        #[arg(long, default_value_t = 0xF600, value_parser = parse_addr)]
        base: u32,
    },
    /// Decode and print a microcode image.
    Disasm {
        /// Microcode binary to decode.
        image: PathBuf,
    },
    /// Execute a microcode image under a cycle budget.
    Run {
        /// Microcode binary to execute.
        image: PathBuf,
        /// SRAM placement of the image (also written to UCODE_BASE).
        #[arg(long, default_value_t = 0xF600, value_parser = parse_addr)]
        base: u32,
        /// External cycle budget before declaring a timeout.
        #[arg(long, default_value_t = DEFAULT_CYCLE_BUDGET)]
        max_cycles: u64,
    },
    /// Run a 16×16 GEMM through the systolic path and compare against
    /// the golden integer product.
    Gemm,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Cmd::Assemble { out, hex, base } => cmd_assemble(&out, hex.as_deref(), base),
        Cmd::Disasm { image } => cmd_disasm(&image),
        Cmd::Run {
            image,
            base,
            max_cycles,
        } => cmd_run(&image, base, max_cycles),
        Cmd::Gemm => cmd_gemm(),
    }
}

fn parse_addr(s: &str) -> std::result::Result<u32, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("invalid address {s:?}: {e}"))
}

fn cmd_assemble(out: &std::path::Path, hex: Option<&std::path::Path>, base: u32) -> Result<()> {
    let mut program = MicrocodeProgram::new();
    program.push(Instruction::of(Opcode::Nop)).end();

    fs::write(out, program.to_bytes()).with_context(|| format!("writing {}", out.display()))?;
    println!(
        "wrote {} ({} instructions, {} bytes)",
        out.display(),
        program.len(),
        program.len() * npu_isa::INSTR_BYTES
    );

    if let Some(hex_path) = hex {
        let file = fs::File::create(hex_path)
            .with_context(|| format!("creating {}", hex_path.display()))?;
        program.write_hex(std::io::BufWriter::new(file), base as usize)?;
        println!("wrote {} (padded to {base:#x})", hex_path.display());
    }
    Ok(())
}

fn cmd_disasm(image: &std::path::Path) -> Result<()> {
    let bytes = fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let program = MicrocodeProgram::from_bytes(&bytes);

    for (idx, instr) in program.instructions().iter().enumerate() {
        println!(
            "{idx:4}: {:<12} flags={:#04x} dst={:#06x} src0={:#06x} src1={:#06x} \
             m={} n={} k={} imm={:#06x}",
            format!("{:?}", instr.op()),
            instr.flags,
            instr.dst,
            instr.src0,
            instr.src1,
            instr.m,
            instr.n,
            instr.k,
            instr.imm,
        );
    }
    if !program.is_terminated() {
        println!("warning: image is not terminated by END");
    }
    Ok(())
}

fn cmd_run(image: &std::path::Path, base: u32, max_cycles: u64) -> Result<()> {
    let bytes = fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let program = MicrocodeProgram::from_bytes(&bytes);
    if !program.is_terminated() {
        println!("warning: image is not terminated by END; expect a timeout");
    }

    let mut npu = Npu::new();
    npu.load_microcode(&program, base as usize)?;
    npu.start_program(base, program.len() as u32);

    match run_until_done(&mut npu, max_cycles) {
        Ok(cycles) => {
            println!("PASS: done after {cycles} cycles");
            Ok(())
        }
        Err(e) => bail!("FAIL: {e}"),
    }
}

fn cmd_gemm() -> Result<()> {
    let mut a = [0i8; 256];
    let mut b = [0i8; 256];
    for i in 0..16 {
        for j in 0..16 {
            a[i * 16 + j] = ((i + j) % 5) as i8 - 2;
            b[i * 16 + j] = ((i * 3 + j * 2) % 7) as i8 - 3;
        }
    }

    let mut npu = Npu::new();
    npu.write_sram(0x1000, &a.map(|v| v as u8))?;
    npu.write_sram(0x1100, &b.map(|v| v as u8))?;

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
    npu.load_microcode(&program, 0xF600)?;
    npu.start_program(0xF600, program.len() as u32);
    let cycles = run_until_done(&mut npu, DEFAULT_CYCLE_BUDGET)?;

    let expected = golden::gemm(&a, &b, 16, 16, 16);
    let out = npu.read_sram(0x2000, 256 * 4);
    let mut mismatches = 0usize;
    for (idx, chunk) in out.chunks_exact(4).enumerate() {
        let got = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if got != expected[idx] {
            mismatches += 1;
        }
    }

    if mismatches == 0 {
        println!("PASS: 256/256 values match golden after {cycles} cycles");
        Ok(())
    } else {
        bail!("FAIL: {mismatches}/256 mismatches");
    }
}
