use std::collections::HashMap;

use crate::kernel::errors::{Error, Result};
use crate::kernel::tree::{Position, Primitives, Tree, TreeData, TreeRef};

/// A primitive operator. Arguments arrive evaluated, in binding order.
pub type BuiltinFn = fn(&Primitives, &[TreeRef], Position) -> Result<TreeRef>;

/// The primitive table the bootstrap library binds `builtin Name` bodies
/// against. An unknown name is a binding error at dispatch time, not at
/// declaration time.
pub struct Builtins {
    table: HashMap<&'static str, BuiltinFn>,
}

impl Builtins {
    pub fn get(&self, name: &str) -> Option<BuiltinFn> {
        self.table.get(name).copied()
    }

    pub fn standard() -> Builtins {
        let mut table: HashMap<&'static str, BuiltinFn> = HashMap::new();

        table.insert("integer_add", |_, args, pos| {
            let (x, y) = integers(args, pos)?;
            Ok(Tree::integer(x.wrapping_add(y), pos))
        });
        table.insert("integer_subtract", |_, args, pos| {
            let (x, y) = integers(args, pos)?;
            Ok(Tree::integer(x.wrapping_sub(y), pos))
        });
        table.insert("integer_multiply", |_, args, pos| {
            let (x, y) = integers(args, pos)?;
            Ok(Tree::integer(x.wrapping_mul(y), pos))
        });
        table.insert("integer_divide", |_, args, pos| {
            let (x, y) = integers(args, pos)?;
            if y == 0 {
                return Err(Error::binding("division by zero", pos));
            }
            Ok(Tree::integer(x.wrapping_div(y), pos))
        });
        table.insert("integer_remainder", |_, args, pos| {
            let (x, y) = integers(args, pos)?;
            if y == 0 {
                return Err(Error::binding("division by zero", pos));
            }
            Ok(Tree::integer(x.wrapping_rem(y), pos))
        });
        table.insert("integer_modulo", |_, args, pos| {
            let (x, y) = integers(args, pos)?;
            if y == 0 {
                return Err(Error::binding("division by zero", pos));
            }
            Ok(Tree::integer(x.rem_euclid(y), pos))
        });
        table.insert("integer_power", |_, args, pos| {
            let (x, y) = integers(args, pos)?;
            if y < 0 {
                return Err(Error::binding("negative integer exponent", pos));
            }
            Ok(Tree::integer(x.wrapping_pow(y.min(u32::MAX as i64) as u32), pos))
        });
        table.insert("integer_negate", |_, args, pos| {
            let x = integer(args, 0, pos)?;
            Ok(Tree::integer(x.wrapping_neg(), pos))
        });
        table.insert("integer_less", |prims, args, pos| {
            let (x, y) = integers(args, pos)?;
            Ok(prims.boolean(x < y))
        });
        table.insert("integer_greater", |prims, args, pos| {
            let (x, y) = integers(args, pos)?;
            Ok(prims.boolean(x > y))
        });
        table.insert("integer_less_or_equal", |prims, args, pos| {
            let (x, y) = integers(args, pos)?;
            Ok(prims.boolean(x <= y))
        });
        table.insert("integer_greater_or_equal", |prims, args, pos| {
            let (x, y) = integers(args, pos)?;
            Ok(prims.boolean(x >= y))
        });
        table.insert("integer_equal", |prims, args, pos| {
            let (x, y) = integers(args, pos)?;
            Ok(prims.boolean(x == y))
        });
        table.insert("integer_different", |prims, args, pos| {
            let (x, y) = integers(args, pos)?;
            Ok(prims.boolean(x != y))
        });

        table.insert("real_add", |_, args, pos| {
            let (x, y) = reals(args, pos)?;
            Ok(Tree::real(x + y, pos))
        });
        table.insert("real_subtract", |_, args, pos| {
            let (x, y) = reals(args, pos)?;
            Ok(Tree::real(x - y, pos))
        });
        table.insert("real_multiply", |_, args, pos| {
            let (x, y) = reals(args, pos)?;
            Ok(Tree::real(x * y, pos))
        });
        table.insert("real_divide", |_, args, pos| {
            let (x, y) = reals(args, pos)?;
            Ok(Tree::real(x / y, pos))
        });
        table.insert("real_negate", |_, args, pos| {
            let x = real(args, 0, pos)?;
            Ok(Tree::real(-x, pos))
        });
        table.insert("real_less", |prims, args, pos| {
            let (x, y) = reals(args, pos)?;
            Ok(prims.boolean(x < y))
        });
        table.insert("real_greater", |prims, args, pos| {
            let (x, y) = reals(args, pos)?;
            Ok(prims.boolean(x > y))
        });
        table.insert("real_less_or_equal", |prims, args, pos| {
            let (x, y) = reals(args, pos)?;
            Ok(prims.boolean(x <= y))
        });
        table.insert("real_greater_or_equal", |prims, args, pos| {
            let (x, y) = reals(args, pos)?;
            Ok(prims.boolean(x >= y))
        });
        table.insert("real_equal", |prims, args, pos| {
            let (x, y) = reals(args, pos)?;
            Ok(prims.boolean(x == y))
        });
        table.insert("real_different", |prims, args, pos| {
            let (x, y) = reals(args, pos)?;
            Ok(prims.boolean(x != y))
        });

        table.insert("text_concatenate", |_, args, pos| {
            let (x, y) = texts(args, pos)?;
            Ok(Tree::text(&format!("{}{}", x, y), "\"", "\"", pos))
        });
        table.insert("text_equal", |prims, args, pos| {
            let (x, y) = texts(args, pos)?;
            Ok(prims.boolean(x == y))
        });
        table.insert("text_different", |prims, args, pos| {
            let (x, y) = texts(args, pos)?;
            Ok(prims.boolean(x != y))
        });

        table.insert("boolean_and", |prims, args, pos| {
            let (x, y) = booleans(args, pos)?;
            Ok(prims.boolean(x && y))
        });
        table.insert("boolean_or", |prims, args, pos| {
            let (x, y) = booleans(args, pos)?;
            Ok(prims.boolean(x || y))
        });
        table.insert("boolean_not", |prims, args, pos| {
            let x = boolean(args, 0, pos)?;
            Ok(prims.boolean(!x))
        });

        table.insert("tree_left", |_, args, pos| {
            let tree = argument(args, 0, pos)?;
            match &tree.data {
                TreeData::Infix { left, .. }
                | TreeData::Prefix { left, .. }
                | TreeData::Postfix { left, .. } => Ok(left.clone()),
                TreeData::Block { child, .. } => Ok(child.clone()),
                _ => Err(Error::binding("value has no left child", pos)),
            }
        });
        table.insert("tree_right", |_, args, pos| {
            let tree = argument(args, 0, pos)?;
            match &tree.data {
                TreeData::Infix { right, .. }
                | TreeData::Prefix { right, .. }
                | TreeData::Postfix { right, .. } => Ok(right.clone()),
                TreeData::Block { child, .. } => Ok(child.clone()),
                _ => Err(Error::binding("value has no right child", pos)),
            }
        });
        table.insert("tree_name", |_, args, pos| {
            let tree = argument(args, 0, pos)?;
            match &tree.data {
                TreeData::Infix { name, .. } => Ok(Tree::text(name, "\"", "\"", pos)),
                TreeData::Name(name) => Ok(Tree::text(name, "\"", "\"", pos)),
                _ => Err(Error::binding("value has no operator name", pos)),
            }
        });
        table.insert("tree_kind", |_, args, pos| {
            let tree = argument(args, 0, pos)?;
            Ok(Tree::text(&tree.kind().to_string(), "\"", "\"", pos))
        });

        Builtins { table }
    }
}

fn argument(args: &[TreeRef], index: usize, pos: Position) -> Result<TreeRef> {
    args.get(index)
        .cloned()
        .ok_or_else(|| Error::internal("missing builtin argument", pos))
}

fn integer(args: &[TreeRef], index: usize, pos: Position) -> Result<i64> {
    let tree = argument(args, index, pos)?;
    tree.as_integer()
        .ok_or_else(|| Error::typing(format!("'{}' is not an integer", tree), tree.position))
}

fn integers(args: &[TreeRef], pos: Position) -> Result<(i64, i64)> {
    Ok((integer(args, 0, pos)?, integer(args, 1, pos)?))
}

fn real(args: &[TreeRef], index: usize, pos: Position) -> Result<f64> {
    let tree = argument(args, index, pos)?;
    tree.as_real()
        .ok_or_else(|| Error::typing(format!("'{}' is not a real", tree), tree.position))
}

fn reals(args: &[TreeRef], pos: Position) -> Result<(f64, f64)> {
    Ok((real(args, 0, pos)?, real(args, 1, pos)?))
}

fn text(args: &[TreeRef], index: usize, pos: Position) -> Result<String> {
    let tree = argument(args, index, pos)?;
    tree.as_text()
        .map(str::to_string)
        .ok_or_else(|| Error::typing(format!("'{}' is not a text", tree), tree.position))
}

fn texts(args: &[TreeRef], pos: Position) -> Result<(String, String)> {
    Ok((text(args, 0, pos)?, text(args, 1, pos)?))
}

fn boolean(args: &[TreeRef], index: usize, pos: Position) -> Result<bool> {
    let tree = argument(args, index, pos)?;
    match tree.as_name() {
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        _ => Err(Error::typing(
            format!("'{}' is not a boolean", tree),
            tree.position,
        )),
    }
}

fn booleans(args: &[TreeRef], pos: Position) -> Result<(bool, bool)> {
    Ok((boolean(args, 0, pos)?, boolean(args, 1, pos)?))
}
