//! Source language: expression and statement trees, the DSL builder, the
//! direct interpreter, and the random program generator.

pub mod build;
pub mod expr;
pub mod gen;
pub mod interp;
pub mod pretty;
pub mod stmt;

pub use build::{
    all, any, dma_read_wait, dma_start_read, dma_start_write, dma_write_wait, else_, end, exp,
    for_, for_body, gather, host_irq, if_, index, log, me, num_qpus, print_float, print_int,
    print_str, receive_float, receive_int, recip, recipsqrt, rotate, rotate_float, sema_dec,
    sema_inc, set_read_stride, set_write_stride, setup_dma_read, setup_dma_write,
    setup_vpm_read, setup_vpm_write, store, to_float, to_int, vpm_get_int, vpm_put, where_,
    while_, BoolExpr, Cond, Float, FloatExpr, Int, IntExpr, ParamKind, Program, Ptr, PtrExpr,
};
