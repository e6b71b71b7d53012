use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sysyc_ir::ir::{BasicBlock, BinOpKind, Function, IcmpCond, IrBuilder, Module};
use sysyc_ir::types::Type;
use sysyc_ir::{PassManager, PassManagerConfig};

/// `int f() { int a[64]; int s = 0; int i = 0; while (i < 64) { a[i] = i;
/// s = s + a[i]; i = i + 1; } return s; }` built straight through the
/// builder — an alloca-heavy loop body that exercises SROA, Mem2Reg,
/// LICM, IndVarSimplify, and the scalar fixed point in the same run.
fn build_loop_module() -> Module {
    let mut m = Module::new("bench");
    let fid = m.add_function(Function::declaration("f", Type::i32(), vec![], false));
    let entry = m.function_mut(fid).add_block(BasicBlock::with_label("entry"));
    let header = m.function_mut(fid).add_block(BasicBlock::with_label("header"));
    let body = m.function_mut(fid).add_block(BasicBlock::with_label("body"));
    let exit = m.function_mut(fid).add_block(BasicBlock::with_label("exit"));
    m.function_mut(fid).entry = Some(entry);

    let array_ty = Type::Array { elem: Box::new(Type::i32()), dims: vec![sysyc_ir::types::Dim::Static(64)] };
    let mut b = IrBuilder::at_end(&mut m, fid, entry);
    let arr = b.build_alloca(array_ty, 4);
    let s_slot = b.build_alloca(Type::i32(), 4);
    let i_slot = b.build_alloca(Type::i32(), 4);
    let zero = b.const_i32(0);
    b.build_store(zero, s_slot);
    let zero2 = b.const_i32(0);
    b.build_store(zero2, i_slot);
    b.build_br(header);

    let mut b = IrBuilder::at_end(&mut m, fid, header);
    let i_val = b.build_load(i_slot, Type::i32());
    let limit = b.const_i32(64);
    let cond = b.build_icmp(IcmpCond::Slt, i_val, limit);
    b.build_cond_br(cond, body, exit);

    let mut b = IrBuilder::at_end(&mut m, fid, body);
    let i_val = b.build_load(i_slot, Type::i32());
    let zero_idx = b.const_i32(0);
    let elem_ptr = b.build_gep(arr, vec![zero_idx, i_val], Type::i32());
    b.build_store(i_val, elem_ptr);
    let s_val = b.build_load(s_slot, Type::i32());
    let elem_val = b.build_load(elem_ptr, Type::i32());
    let s_next = b.build_binop(BinOpKind::Add, s_val, elem_val, Type::i32());
    b.build_store(s_next, s_slot);
    let i_val = b.build_load(i_slot, Type::i32());
    let one = b.const_i32(1);
    let i_next = b.build_binop(BinOpKind::Add, i_val, one, Type::i32());
    b.build_store(i_next, i_slot);
    b.build_br(header);

    let mut b = IrBuilder::at_end(&mut m, fid, exit);
    let s_final = b.build_load(s_slot, Type::i32());
    b.build_ret(Some(s_final));

    m
}

fn full_pipeline_benchmark(c: &mut Criterion) {
    c.bench_function("pass manager over alloca loop", |b| {
        b.iter(|| {
            let mut m = black_box(build_loop_module());
            let mut pm = PassManager::new(PassManagerConfig::default());
            pm.run(&mut m);
            black_box(&m);
        })
    });
}

fn mem2reg_only_benchmark(c: &mut Criterion) {
    c.bench_function("mem2reg over alloca loop", |b| {
        b.iter(|| {
            let mut m = black_box(build_loop_module());
            sysyc_ir::transform::sroa::run(&mut m);
            sysyc_ir::transform::mem2reg::run(&mut m);
            black_box(&m);
        })
    });
}

criterion_group!(benches, full_pipeline_benchmark, mem2reg_only_benchmark);
criterion_main!(benches);
