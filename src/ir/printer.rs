//! Textual form of the IR.
//!
//! Every op is printed in one generic shape:
//!
//! ```text
//! %r0, %r1 = name(%a, %b) {inherent = 1, marker} ({
//! ^bb0(%x: i64):
//!   ...
//! }) : i64, tensor<4xi64>
//! ```
//!
//! [`crate::frontend::parse`] reads exactly this format back.

use crate::ir::function::{BlockId, IrFunction, OpId, ValueId};
use crate::ir::ops::Attribute;
use crate::utils::pretty::{format_list, CodeFormatter};
use std::collections::HashMap;

/// Render a function as text.
pub fn print_function(func: &IrFunction) -> String {
    let mut printer = Printer::new(func);
    printer.print();
    printer.fmt.finish()
}

struct Printer<'a> {
    func: &'a IrFunction,
    names: HashMap<ValueId, String>,
    next_id: usize,
    fmt: CodeFormatter,
}

impl<'a> Printer<'a> {
    fn new(func: &'a IrFunction) -> Self {
        Self {
            func,
            names: HashMap::new(),
            next_id: 0,
            fmt: CodeFormatter::default_indent(),
        }
    }

    fn name_value(&mut self, value: ValueId) -> String {
        let name = format!("%{}", self.next_id);
        self.next_id += 1;
        self.names.insert(value, name.clone());
        name
    }

    fn value_name(&self, value: ValueId) -> String {
        self.names
            .get(&value)
            .cloned()
            .unwrap_or_else(|| format!("%<undefined {}>", value))
    }

    fn typed_args(&mut self, args: &[ValueId]) -> String {
        let mut parts = Vec::with_capacity(args.len());
        for &arg in args {
            let name = match self.names.get(&arg) {
                Some(name) => name.clone(),
                None => self.name_value(arg),
            };
            parts.push(format!("{}: {}", name, self.func.value_type(arg)));
        }
        parts.join(", ")
    }

    fn print(&mut self) {
        let args = self.func.args().to_vec();
        for (i, &arg) in args.iter().enumerate() {
            self.names.insert(arg, format!("%arg{}", i));
        }
        let header = format!("func @{}({}) {{", self.func.name, self.typed_args(&args));
        self.fmt.writeln(&header);
        self.fmt.indent();
        self.print_ops(self.func.body());
        self.fmt.dedent();
        self.fmt.writeln("}");
    }

    fn print_ops(&mut self, block: BlockId) {
        for op in self.func.block(block).ops.clone() {
            self.print_op(op);
        }
    }

    fn print_op(&mut self, op_id: OpId) {
        let func = self.func;
        let op = func.op(op_id);
        let mut line = String::new();
        if !op.results.is_empty() {
            let names: Vec<String> = op.results.iter().map(|&r| self.name_value(r)).collect();
            line.push_str(&names.join(", "));
            line.push_str(" = ");
        }
        let operands: Vec<String> = op.operands.iter().map(|&v| self.value_name(v)).collect();
        line.push_str(&format!("{}({})", op.kind.name(), operands.join(", ")));

        let mut attrs: Vec<String> = op
            .kind
            .inherent_attrs()
            .into_iter()
            .map(|(k, v)| format!("{} = {}", k, v))
            .collect();
        attrs.extend(op.attrs.iter().map(|(k, v)| format_attr(k, v)));
        if !attrs.is_empty() {
            line.push_str(&format!(" {{{}}}", attrs.join(", ")));
        }

        let regions = op.regions.clone();
        let result_types: Vec<String> = op
            .results
            .iter()
            .map(|&r| self.func.value_type(r).to_string())
            .collect();
        let type_suffix = if result_types.is_empty() {
            String::new()
        } else {
            format!(" : {}", format_list(&result_types, ", "))
        };

        if regions.is_empty() {
            line.push_str(&type_suffix);
            self.fmt.writeln(&line);
            return;
        }

        line.push_str(" (");
        self.fmt.write(&line);
        for (i, &region) in regions.iter().enumerate() {
            if i > 0 {
                self.fmt.write(", ");
            }
            let args = self.func.block(region).args.clone();
            let label = format!("^bb{}({}):", i, self.typed_args(&args));
            self.fmt.begin_region(&label);
            self.print_ops(region);
            self.fmt.end_region();
        }
        self.fmt.writeln(&format!("){}", type_suffix));
    }
}

fn format_attr(key: &str, value: &Attribute) -> String {
    let key = if is_bare_identifier(key) {
        key.to_string()
    } else {
        Attribute::Str(key.to_string()).to_string()
    };
    match value {
        Attribute::Unit => key,
        other => format!("{} = {}", key, other),
    }
}

fn is_bare_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ops::{LoopInfo, LoopKind, OpKind};
    use crate::ir::rewriter::Rewriter;
    use crate::ir::types::Type;

    #[test]
    fn test_print_loop() {
        let mut func = IrFunction::new("count", vec![Type::Int]);
        let body = func.body();
        let n = func.args()[0];
        let mut rw = Rewriter::new(&mut func);
        rw.set_insertion_point_to_end(body);
        let c0 = rw.constant(0);
        let c3 = rw.constant(3);
        let lp = rw.create_loop(LoopInfo::new(LoopKind::For, 1), &[c0], &[n], &[c3], &[c0]);
        rw.set_attr(lp, "__internal_peeled_marker__", Attribute::Unit);
        let lp_body = rw.func().op(lp).regions[0];
        let acc = rw.func().block(lp_body).args[1];
        rw.set_insertion_point_to_end(lp_body);
        rw.yield_values(vec![acc]);
        let result = rw.func().op(lp).results[0];
        rw.set_insertion_point_to_end(body);
        rw.create(OpKind::Return, vec![result], vec![], vec![]);

        let text = print_function(&func);
        let expected = "\
func @count(%arg0: i64) {
  %0 = constant() {value = 0} : i64
  %1 = constant() {value = 3} : i64
  %2 = for(%0, %arg0, %1, %0) {dims = 1, __internal_peeled_marker__} ({
  ^bb0(%3: i64, %4: i64):
    yield(%4)
  }) : i64
  return(%2)
}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_format_attr_quotes_odd_keys() {
        assert_eq!(format_attr("label", &Attribute::Str("a".into())), "label = \"a\"");
        assert_eq!(format_attr("has space", &Attribute::Unit), "\"has space\"");
    }
}
