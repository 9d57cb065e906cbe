//! Source-tree pretty printer, used by `Kernel::pretty`.

use super::build::Program;
use super::expr::{BExpr, BExprId, CQuant, CmpId, Expr, ExprId, OpId, Var};
use super::stmt::{Stmt, StmtId};

pub fn pretty(prog: &Program) -> String {
    let mut out = String::new();
    stmt(prog, prog.body, 0, &mut out);
    out
}

fn indent(level: usize, out: &mut String) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

fn expr(prog: &Program, e: ExprId, out: &mut String) {
    match prog.expr(e) {
        Expr::IntLit(i) => out.push_str(&i.to_string()),
        Expr::FloatLit(f) => out.push_str(&format!("{f}")),
        Expr::Var(v) => match v {
            Var::Standard(id) => out.push_str(&format!("v{id}")),
            Var::Uniform => out.push_str("UNIFORM"),
            Var::ElemNum => out.push_str("ELEM_NUM"),
            Var::QpuNum => out.push_str("QPU_NUM"),
            Var::VpmRead => out.push_str("VPM_READ"),
            Var::VpmWrite => out.push_str("VPM_WRITE"),
        },
        Expr::Deref(p) => {
            out.push('*');
            expr(prog, *p, out);
        }
        Expr::ApplyUnary { op, rhs } => {
            out.push_str(&format!("{:?}(", op.id));
            expr(prog, *rhs, out);
            out.push(')');
        }
        Expr::Apply { lhs, op, rhs } => {
            let sym = match op.id {
                OpId::Add => "+",
                OpId::Sub => "-",
                OpId::Mul => "*",
                OpId::Shl => "<<",
                OpId::Shr => ">>",
                OpId::BAnd => "&",
                OpId::BOr => "|",
                OpId::BXor => "^",
                other => {
                    out.push_str(&format!("{other:?}("));
                    expr(prog, *lhs, out);
                    out.push_str(", ");
                    expr(prog, *rhs, out);
                    out.push(')');
                    return;
                }
            };
            out.push('(');
            expr(prog, *lhs, out);
            out.push_str(&format!(" {sym} "));
            expr(prog, *rhs, out);
            out.push(')');
        }
    }
}

fn bexpr(prog: &Program, b: BExprId, out: &mut String) {
    match prog.bexpr(b) {
        BExpr::Not(x) => {
            out.push('!');
            bexpr(prog, *x, out);
        }
        BExpr::And(x, y) => {
            out.push('(');
            bexpr(prog, *x, out);
            out.push_str(" && ");
            bexpr(prog, *y, out);
            out.push(')');
        }
        BExpr::Or(x, y) => {
            out.push('(');
            bexpr(prog, *x, out);
            out.push_str(" || ");
            bexpr(prog, *y, out);
            out.push(')');
        }
        BExpr::Cmp { lhs, op, rhs } => {
            let sym = match op.id {
                CmpId::Eq => "==",
                CmpId::Neq => "!=",
                CmpId::Lt => "<",
                CmpId::Le => "<=",
                CmpId::Gt => ">",
                CmpId::Ge => ">=",
            };
            expr(prog, *lhs, out);
            out.push_str(&format!(" {sym} "));
            expr(prog, *rhs, out);
        }
    }
}

fn quant(q: CQuant) -> &'static str {
    match q {
        CQuant::Any => "any",
        CQuant::All => "all",
    }
}

fn stmt(prog: &Program, s: StmtId, level: usize, out: &mut String) {
    match prog.stmt(s) {
        Stmt::Skip => {}
        Stmt::Seq { s0, s1 } => {
            stmt(prog, *s0, level, out);
            stmt(prog, *s1, level, out);
        }
        Stmt::Assign { lhs, rhs } => {
            indent(level, out);
            expr(prog, *lhs, out);
            out.push_str(" = ");
            expr(prog, *rhs, out);
            out.push('\n');
        }
        Stmt::Where {
            cond,
            then_stmt,
            else_stmt,
        } => {
            indent(level, out);
            out.push_str("where ");
            bexpr(prog, *cond, out);
            out.push('\n');
            stmt(prog, *then_stmt, level + 1, out);
            if let Some(e) = else_stmt {
                indent(level, out);
                out.push_str("else\n");
                stmt(prog, *e, level + 1, out);
            }
            indent(level, out);
            out.push_str("end\n");
        }
        Stmt::If {
            cond,
            then_stmt,
            else_stmt,
        } => {
            indent(level, out);
            out.push_str(&format!("if {}(", quant(cond.quant)));
            bexpr(prog, cond.bexpr, out);
            out.push_str(")\n");
            stmt(prog, *then_stmt, level + 1, out);
            if let Some(e) = else_stmt {
                indent(level, out);
                out.push_str("else\n");
                stmt(prog, *e, level + 1, out);
            }
            indent(level, out);
            out.push_str("end\n");
        }
        Stmt::While { cond, body } => {
            indent(level, out);
            out.push_str(&format!("while {}(", quant(cond.quant)));
            bexpr(prog, cond.bexpr, out);
            out.push_str(")\n");
            stmt(prog, *body, level + 1, out);
            indent(level, out);
            out.push_str("end\n");
        }
        Stmt::For { cond, inc, body } => {
            indent(level, out);
            out.push_str(&format!("for {}(", quant(cond.quant)));
            bexpr(prog, cond.bexpr, out);
            out.push_str(")\n");
            stmt(prog, *body, level + 1, out);
            indent(level + 1, out);
            out.push_str("-- increment --\n");
            stmt(prog, *inc, level + 1, out);
            indent(level, out);
            out.push_str("end\n");
        }
        Stmt::PrintStr(s) => {
            indent(level, out);
            out.push_str(&format!("print {s:?}\n"));
        }
        Stmt::PrintInt(e) => {
            indent(level, out);
            out.push_str("print_int ");
            expr(prog, *e, out);
            out.push('\n');
        }
        Stmt::PrintFloat(e) => {
            indent(level, out);
            out.push_str("print_float ");
            expr(prog, *e, out);
            out.push('\n');
        }
        Stmt::StoreRequest { data, addr } => {
            indent(level, out);
            out.push_str("store ");
            expr(prog, *data, out);
            out.push_str(" -> ");
            expr(prog, *addr, out);
            out.push('\n');
        }
        Stmt::Gather { addr } => {
            indent(level, out);
            out.push_str("gather ");
            expr(prog, *addr, out);
            out.push('\n');
        }
        Stmt::LoadReceive { dest } => {
            indent(level, out);
            out.push_str("receive ");
            expr(prog, *dest, out);
            out.push('\n');
        }
        Stmt::SemaInc(id) => {
            indent(level, out);
            out.push_str(&format!("sema_inc {id}\n"));
        }
        Stmt::SemaDec(id) => {
            indent(level, out);
            out.push_str(&format!("sema_dec {id}\n"));
        }
        Stmt::SendIrqToHost => {
            indent(level, out);
            out.push_str("host_irq\n");
        }
        other => {
            indent(level, out);
            out.push_str(&format!("{other:?}\n"));
        }
    }
}
