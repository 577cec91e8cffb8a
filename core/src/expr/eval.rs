//! Tree walking evaluator.
use super::{
    ast::{self, Expr, MemberKey},
    runtime::Runtime,
};
use crate::{
    Error,
    service::Services,
    types::{Property, Type, builtins},
    value::{Callable, Function, Map, Value, Variables},
};
use std::{borrow::Cow, cmp, sync::Arc};

/// Numbers closer than this compare equal when either side is a float.
const EPSILON: f64 = 1e-6;

/// Evaluate an expression with `this` as the current receiver.
pub fn eval<'a>(expr: &'a Expr, rt: &mut Runtime<'a>, this: &Value) -> Result<Value, Error> {
    match expr {
        Expr::Constant(value) => Ok(value.clone()),
        Expr::Variable(var) => Ok(rt.slot(var.slot)),
        Expr::Assign(expr) => {
            let value = eval(&expr.value, rt, this)?;
            rt.set_slot(expr.var.slot, value.clone());
            Ok(value)
        }
        Expr::Ref(ast::ExprRef::Context) => Ok(Value::Map(Map::from(&**rt.variables()))),
        Expr::Ref(ast::ExprRef::Root) => Ok(rt.root().clone()),
        Expr::Ref(ast::ExprRef::This) => Ok(this.clone()),
        Expr::Unary(expr) => eval_unary(expr, rt, this),
        Expr::Binary(expr) => eval_binary(expr, rt, this),
        Expr::Ternary(expr) => {
            let cond = eval(&expr.cond, rt, this)?;
            if rt.services().conversions.to_bool(&cond) {
                eval(&expr.then, rt, this)
            } else {
                eval(&expr.otherwise, rt, this)
            }
        }
        Expr::Elvis(expr) => {
            let left = eval(&expr.left, rt, this)?;
            if left.is_null() {
                eval(&expr.right, rt, this)
            } else {
                Ok(left)
            }
        }
        Expr::Track(expr) => {
            let receiver = eval(&expr.left, rt, this)?;
            if expr.null_safe && receiver.is_null() {
                return Ok(Value::Null);
            }
            eval(&expr.right, rt, &receiver)
        }
        Expr::Select(expr) => eval_select(expr, rt, this),
        Expr::Project(expr) => {
            let items = rt.services().collections.iter(this)?;
            let mut out = vec![];
            for item in items {
                out.push(eval(&expr.expr, rt, &item)?);
            }
            Ok(Value::from(out))
        }
        Expr::List(expr) => {
            let items = expr
                .items
                .iter()
                .map(|item| eval(item, rt, this))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::from(items))
        }
        Expr::Map(expr) => {
            let map = Map::new();
            for (key, value) in expr.entries.iter() {
                let key = eval(key, rt, this)?;
                let value = eval(value, rt, this)?;
                map.insert(key, value);
            }
            Ok(Value::Map(map))
        }
        Expr::Property(expr) => eval_property(expr, rt, this),
        Expr::PropertySet(expr) => eval_property_set(expr, rt, this),
        Expr::Index(expr) => {
            let key = eval(&expr.key, rt, this)?;
            let collections = &rt.services().collections;
            if collections.is_readable(this) {
                collections.get(this, &key)
            } else {
                read_property(rt, &expr.cache, this, &key.to_string())
            }
        }
        Expr::IndexSet(expr) => {
            let value = eval(&expr.value, rt, this)?;
            let target = eval(&expr.target, rt, this)?;
            let key = eval(&expr.key, rt, &target)?;
            let collections = rt.services().collections.clone();
            if collections.is_writable(&target) {
                collections.set(&target, &key, value.clone())?;
                Ok(value)
            } else {
                write_property(rt, &expr.cache, &target, None, &key.to_string(), value)
            }
        }
        Expr::Method(expr) => eval_method(expr, rt, this),
        Expr::New(expr) => {
            let args = eval_args(&expr.args, rt, this)?;
            let types = rt.services().types.clone();
            let ty = types.resolve(&expr.ty)?;
            let constructor = expr.cache.get_or_try_insert_with(
                &MemberKey::new(&ty, "<init>", args.len()),
                || {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(ty = ty.name(), arity = args.len(), "resolve constructor");

                    types
                        .find_constructor(&ty, args.len())
                        .ok_or_else(|| Error::UnresolvedConstructor {
                            ty: ty.name().to_string(),
                            arity: args.len(),
                        })
                },
            )?;
            let args = convert_args(rt.services(), args, constructor.params())?;
            constructor.invoke(&ty, args)
        }
        Expr::Cast(expr) => {
            let value = eval(&expr.expr, rt, this)?;
            if value.is_null() {
                return Ok(value);
            }
            let services = rt.services();
            let ty = services.types.resolve(&expr.ty)?;
            services.conversions.convert(value, &ty)
        }
        Expr::TypeRef(expr) => Ok(Value::Type(rt.services().types.resolve(&expr.name)?)),
        Expr::InstanceOf(expr) => {
            let value = eval(&expr.expr, rt, this)?;
            let ty = eval(&expr.ty, rt, this)?;
            if value.is_null() {
                return Ok(Value::Bool(false));
            }
            let types = &rt.services().types;
            let ty = match ty {
                Value::Type(ty) => ty,
                Value::String(name) => types.resolve(&name)?,
                ty => {
                    return Err(Error::invalid_operation(format!(
                        "`is` requires a type, found {}",
                        ty.kind_name()
                    )));
                }
            };
            Ok(Value::Bool(types.is_instance(&value, &ty)))
        }
        Expr::Like(expr) => {
            let value = eval(&expr.expr, rt, this)?;
            let regex = match &expr.regex {
                Some(regex) => Cow::Borrowed(regex),
                None => {
                    let pattern = eval(&expr.pattern, rt, this)?;
                    let regex = ast::full_match(&pattern.to_string())
                        .map_err(|err| Error::invalid_operation(err.to_string()))?;
                    Cow::Owned(regex)
                }
            };
            if value.is_null() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(regex.is_match(&value.to_string())))
        }
        Expr::Sequence(expr) => {
            let mut last = Value::Null;
            for expr in expr.exprs.iter() {
                last = eval(expr, rt, this)?;
                if rt.is_stop_requested() {
                    break;
                }
            }
            Ok(last)
        }
        Expr::If(expr) => {
            let cond = eval(&expr.cond, rt, this)?;
            if rt.services().conversions.to_bool(&cond) {
                eval(&expr.then, rt, this)
            } else if let Some(otherwise) = &expr.otherwise {
                eval(otherwise, rt, this)
            } else {
                Ok(Value::Null)
            }
        }
        Expr::While(expr) => {
            loop {
                let cond = eval(&expr.cond, rt, this)?;
                if !rt.services().conversions.to_bool(&cond) {
                    break;
                }
                let value = eval(&expr.body, rt, this)?;
                if rt.is_return_requested() {
                    return Ok(value);
                }
                if rt.take_break() {
                    break;
                }
                rt.take_continue();
            }
            Ok(Value::Null)
        }
        Expr::For(expr) => {
            let iterable = eval(&expr.iterable, rt, this)?;
            let items = rt.services().collections.iter(&iterable)?;
            for item in items {
                rt.set_slot(expr.var.slot, item);
                let value = eval(&expr.body, rt, this)?;
                if rt.is_return_requested() {
                    return Ok(value);
                }
                if rt.take_break() {
                    break;
                }
                rt.take_continue();
            }
            Ok(Value::Null)
        }
        Expr::Return(expr) => {
            let value = match &expr.value {
                Some(value) => eval(value, rt, this)?,
                None => Value::Null,
            };
            rt.request_return();
            Ok(value)
        }
        Expr::Jump(ast::Jump::Break) => {
            rt.request_break();
            Ok(Value::Null)
        }
        Expr::Jump(ast::Jump::Continue) => {
            rt.request_continue();
            Ok(Value::Null)
        }
        Expr::Group(expr) => eval(&expr.expr, rt, this),
        Expr::Lambda(expr) => Ok(Value::Function(Function::new(Closure {
            params: expr.params.iter().map(|param| param.slot).collect(),
            body: expr.body.clone(),
            this: this.clone(),
            root: rt.root().clone(),
            variables: rt.variables().clone(),
            slots: rt.slots().to_vec(),
            services: rt.services().clone(),
        }))),
        Expr::Debug(node) => {
            rt.push_frame(node, this.clone());
            node.ctx.hit(&node.span);
            let result = eval(&node.inner, rt, this).map_err(|err| {
                let err = if err.is_traced() {
                    err
                } else {
                    Error::Traced {
                        trace: rt.render_stack(),
                        source: Box::new(err),
                    }
                };
                node.ctx.fail(&node.span, &err);
                err
            });
            rt.pop_frame();
            result
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Float(value) => Some(Self::Float(*value)),
            value => value.as_int().map(Self::Int),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Int(value) => value as f64,
            Self::Float(value) => value,
        }
    }
}

fn eval_unary<'a>(
    expr: &'a ast::ExprUnary,
    rt: &mut Runtime<'a>,
    this: &Value,
) -> Result<Value, Error> {
    let value = eval(&expr.expr, rt, this)?;
    match expr.op {
        ast::OpUnary::Not => Ok(Value::Bool(!rt.services().conversions.to_bool(&value))),
        ast::OpUnary::Plus => match Num::of(&value) {
            Some(Num::Int(value)) => Ok(Value::Int(value)),
            Some(Num::Float(value)) => Ok(Value::Float(value)),
            None => Err(Error::invalid_operation(format!(
                "can not apply `+` to {}",
                value.kind_name()
            ))),
        },
        ast::OpUnary::Minus => match Num::of(&value) {
            Some(Num::Int(value)) => value.checked_neg().map(Value::Int).ok_or(Error::Overflow),
            Some(Num::Float(value)) => Ok(Value::Float(-value)),
            None => Err(Error::invalid_operation(format!(
                "can not negate {}",
                value.kind_name()
            ))),
        },
        ast::OpUnary::BitNot => {
            let value = rt
                .services()
                .conversions
                .convert(value, &builtins().int)?;
            match value.as_int() {
                Some(value) => Ok(Value::Int(!value)),
                None => Err(Error::invalid_operation("`~` requires an integer")),
            }
        }
    }
}

fn eval_binary<'a>(
    expr: &'a ast::ExprBinary,
    rt: &mut Runtime<'a>,
    this: &Value,
) -> Result<Value, Error> {
    use ast::OpBinary;

    let left = eval(&expr.left, rt, this)?;
    match expr.op {
        OpBinary::And => {
            if !rt.services().conversions.to_bool(&left) {
                return Ok(Value::Bool(false));
            }
            let right = eval(&expr.right, rt, this)?;
            return Ok(Value::Bool(rt.services().conversions.to_bool(&right)));
        }
        OpBinary::Or => {
            if rt.services().conversions.to_bool(&left) {
                return Ok(Value::Bool(true));
            }
            let right = eval(&expr.right, rt, this)?;
            return Ok(Value::Bool(rt.services().conversions.to_bool(&right)));
        }
        _ => {}
    }

    let right = eval(&expr.right, rt, this)?;
    match expr.op {
        OpBinary::Add => {
            if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                return Ok(Value::String(format!("{left}{right}")));
            }
            arithmetic(expr.op, &left, &right, i64::checked_add, |l, r| l + r)
        }
        OpBinary::Sub => arithmetic(expr.op, &left, &right, i64::checked_sub, |l, r| l - r),
        OpBinary::Mul => arithmetic(expr.op, &left, &right, i64::checked_mul, |l, r| l * r),
        OpBinary::Div => {
            if let (Some(Num::Int(_)), Some(Num::Int(0))) = (Num::of(&left), Num::of(&right)) {
                return Err(Error::Div0);
            }
            arithmetic(expr.op, &left, &right, i64::checked_div, |l, r| l / r)
        }
        OpBinary::Rem => {
            if let (Some(Num::Int(_)), Some(Num::Int(0))) = (Num::of(&left), Num::of(&right)) {
                return Err(Error::Div0);
            }
            // `i64::MIN % -1` is 0, not an overflow.
            arithmetic(expr.op, &left, &right, |l, r| Some(l.wrapping_rem(r)), |l, r| l % r)
        }
        OpBinary::Shl | OpBinary::Shr | OpBinary::UShr => {
            let (Some(value), Some(shift)) = (left.as_int(), right.as_int()) else {
                return Err(invalid_operands(expr.op, &left, &right));
            };
            let shift = (shift & 63) as u32;
            let value = match expr.op {
                OpBinary::Shl => value.wrapping_shl(shift),
                OpBinary::Shr => value.wrapping_shr(shift),
                _ => ((value as u64) >> shift) as i64,
            };
            Ok(Value::Int(value))
        }
        OpBinary::BitAnd | OpBinary::BitOr | OpBinary::Xor => {
            if let (Value::Bool(l), Value::Bool(r)) = (&left, &right) {
                let value = match expr.op {
                    OpBinary::BitAnd => l & r,
                    OpBinary::BitOr => l | r,
                    _ => l ^ r,
                };
                return Ok(Value::Bool(value));
            }
            let (Some(l), Some(r)) = (left.as_int(), right.as_int()) else {
                return Err(invalid_operands(expr.op, &left, &right));
            };
            let value = match expr.op {
                OpBinary::BitAnd => l & r,
                OpBinary::BitOr => l | r,
                _ => l ^ r,
            };
            Ok(Value::Int(value))
        }
        OpBinary::Eq => Ok(Value::Bool(value_eq(&left, &right))),
        OpBinary::Neq => Ok(Value::Bool(!value_eq(&left, &right))),
        OpBinary::Lt => {
            let ord = value_ord(expr.op, &left, &right)?;
            Ok(Value::Bool(matches!(ord, Some(cmp::Ordering::Less))))
        }
        OpBinary::Lte => {
            let ord = value_ord(expr.op, &left, &right)?;
            Ok(Value::Bool(matches!(
                ord,
                Some(cmp::Ordering::Less | cmp::Ordering::Equal)
            )))
        }
        OpBinary::Gt => {
            let ord = value_ord(expr.op, &left, &right)?;
            Ok(Value::Bool(matches!(ord, Some(cmp::Ordering::Greater))))
        }
        OpBinary::Gte => {
            let ord = value_ord(expr.op, &left, &right)?;
            Ok(Value::Bool(matches!(
                ord,
                Some(cmp::Ordering::Greater | cmp::Ordering::Equal)
            )))
        }
        OpBinary::In => Ok(Value::Bool(
            rt.services().collections.contains(&right, &left)?,
        )),
        OpBinary::NotIn => Ok(Value::Bool(
            !rt.services().collections.contains(&right, &left)?,
        )),
        OpBinary::And | OpBinary::Or => unreachable!("short circuited above"),
    }
}

/// Integer arithmetic if both operands are integers, otherwise floating.
fn arithmetic(
    op: ast::OpBinary,
    left: &Value,
    right: &Value,
    int: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> Result<Value, Error> {
    match (Num::of(left), Num::of(right)) {
        (Some(Num::Int(l)), Some(Num::Int(r))) => int(l, r).map(Value::Int).ok_or(Error::Overflow),
        (Some(l), Some(r)) => Ok(Value::Float(float(l.as_f64(), r.as_f64()))),
        _ => Err(invalid_operands(op, left, right)),
    }
}

fn invalid_operands(op: ast::OpBinary, left: &Value, right: &Value) -> Error {
    Error::invalid_operation(format!(
        "can not apply `{op}` to {} and {}",
        left.kind_name(),
        right.kind_name()
    ))
}

/// Numbers compare by value, within [`EPSILON`] if either is a float.
fn value_eq(left: &Value, right: &Value) -> bool {
    match (Num::of(left), Num::of(right)) {
        (Some(Num::Int(l)), Some(Num::Int(r))) => l == r,
        (Some(l), Some(r)) => (l.as_f64() - r.as_f64()).abs() < EPSILON,
        _ => left == right,
    }
}

/// Natural ordering of two values.
/// `None` if either is `NaN`.
///
/// # Errors
/// + If the values have no common ordering.
fn value_ord(
    op: ast::OpBinary,
    left: &Value,
    right: &Value,
) -> Result<Option<cmp::Ordering>, Error> {
    match (left, right) {
        (Value::String(l), Value::String(r)) => return Ok(Some(l.cmp(r))),
        (Value::DateTime(l), Value::DateTime(r)) => return Ok(Some(l.cmp(r))),
        (Value::Bool(l), Value::Bool(r)) => return Ok(Some(l.cmp(r))),
        _ => {}
    }

    match (Num::of(left), Num::of(right)) {
        (Some(Num::Int(l)), Some(Num::Int(r))) => Ok(Some(l.cmp(&r))),
        (Some(l), Some(r)) => Ok(l.as_f64().partial_cmp(&r.as_f64())),
        _ => Err(invalid_operands(op, left, right)),
    }
}

fn eval_select<'a>(
    expr: &'a ast::ExprSelect,
    rt: &mut Runtime<'a>,
    this: &Value,
) -> Result<Value, Error> {
    let items = rt.services().collections.iter(this)?;
    let mut selected = vec![];
    for item in items {
        let keep = eval(&expr.filter, rt, &item)?;
        if !rt.services().conversions.to_bool(&keep) {
            continue;
        }
        match expr.kind {
            ast::Selection::First => return Ok(item),
            ast::Selection::Last => selected = vec![item],
            ast::Selection::All => selected.push(item),
        }
    }

    match expr.kind {
        ast::Selection::All => Ok(Value::from(selected)),
        ast::Selection::First | ast::Selection::Last => Ok(selected.pop().unwrap_or_default()),
    }
}

fn eval_property<'a>(
    expr: &'a ast::ExprProperty,
    rt: &mut Runtime<'a>,
    this: &Value,
) -> Result<Value, Error> {
    match &expr.receiver {
        ast::Receiver::Static(name) => {
            let ty = rt.services().types.resolve(name)?;
            let property = resolve_getter(rt.services(), &expr.cache, &ty, &expr.name)?;
            property.get(&Value::Null)
        }
        ast::Receiver::Instance => {
            if expr.rooted
                && let Some(value) = rt.variable(&expr.name)
            {
                return Ok(value.clone());
            }
            read_property(rt, &expr.cache, this, &expr.name)
        }
    }
}

/// Read a property of an instance.
/// Map keys shadow members of the map type.
fn read_property(
    rt: &Runtime,
    cache: &ast::MemberCache<Property>,
    receiver: &Value,
    name: &str,
) -> Result<Value, Error> {
    let services = rt.services();
    match receiver {
        Value::Null => Err(Error::NullReceiver {
            member: name.to_string(),
        }),
        Value::Map(map) => {
            if let Some(value) = map.get(&Value::string(name)) {
                return Ok(value);
            }
            let ty = services.types.type_of(receiver);
            match resolve_getter(services, cache, &ty, name) {
                Ok(property) => property.get(receiver),
                Err(Error::UnresolvedProperty { .. }) => Ok(Value::Null),
                Err(err) => Err(err),
            }
        }
        receiver => {
            let ty = services.types.type_of(receiver);
            resolve_getter(services, cache, &ty, name)?.get(receiver)
        }
    }
}

fn resolve_getter(
    services: &Services,
    cache: &ast::MemberCache<Property>,
    ty: &Arc<Type>,
    name: &str,
) -> Result<Property, Error> {
    cache.get_or_try_insert_with(&MemberKey::new(ty, name, 0), || {
        #[cfg(feature = "tracing")]
        tracing::debug!(ty = ty.name(), name, "resolve getter");

        services
            .types
            .find_getter(ty, name)
            .ok_or_else(|| Error::UnresolvedProperty {
                ty: ty.name().to_string(),
                name: name.to_string(),
            })
    })
}

fn eval_property_set<'a>(
    expr: &'a ast::ExprPropertySet,
    rt: &mut Runtime<'a>,
    this: &Value,
) -> Result<Value, Error> {
    let value = eval(&expr.value, rt, this)?;
    if let ast::Receiver::Static(name) = &expr.receiver {
        let ty = rt.services().types.resolve(name)?;
        return write_property(rt, &expr.cache, &Value::Null, Some(&ty), &expr.name, value);
    }

    let target = match &expr.target {
        Some(target) => eval(target, rt, this)?,
        None => this.clone(),
    };
    if expr.null_safe && target.is_null() {
        return Ok(Value::Null);
    }
    write_property(rt, &expr.cache, &target, None, &expr.name, value)
}

/// Assign a property.
/// `ty` is given for static properties, otherwise it is the type of the receiver.
///
/// # Returns
/// The assigned value.
fn write_property(
    rt: &Runtime,
    cache: &ast::MemberCache<Property>,
    receiver: &Value,
    ty: Option<&Arc<Type>>,
    name: &str,
    value: Value,
) -> Result<Value, Error> {
    let services = rt.services();
    let ty = match (ty, receiver) {
        (Some(ty), _) => ty.clone(),
        (None, Value::Null) => {
            return Err(Error::NullReceiver {
                member: name.to_string(),
            });
        }
        (None, Value::Map(map)) => {
            map.insert(name, value.clone());
            return Ok(value);
        }
        (None, receiver) => services.types.type_of(receiver),
    };

    let property = cache.get_or_try_insert_with(&MemberKey::new(&ty, name, 1), || {
        #[cfg(feature = "tracing")]
        tracing::debug!(ty = ty.name(), name, "resolve setter");

        services
            .types
            .find_setter(&ty, name)
            .ok_or_else(|| Error::UnresolvedProperty {
                ty: ty.name().to_string(),
                name: name.to_string(),
            })
    })?;

    let converted = match property.value_type() {
        Some(target) => services.conversions.convert(value.clone(), target)?,
        None => value.clone(),
    };
    property.set(receiver, converted)?;
    Ok(value)
}

fn eval_method<'a>(
    expr: &'a ast::ExprMethod,
    rt: &mut Runtime<'a>,
    this: &Value,
) -> Result<Value, Error> {
    let args = eval_args(&expr.args, rt, this)?;
    let services = rt.services();
    let (receiver, ty) = match &expr.receiver {
        ast::Receiver::Static(name) => (Value::Null, services.types.resolve(name)?),
        ast::Receiver::Instance if this.is_null() => {
            return Err(Error::NullReceiver {
                member: format!("{}()", expr.name),
            });
        }
        ast::Receiver::Instance => (this.clone(), services.types.type_of(this)),
    };

    let method = expr.cache.get_or_try_insert_with(
        &MemberKey::new(&ty, expr.name.as_str(), args.len()),
        || {
            #[cfg(feature = "tracing")]
            tracing::debug!(ty = ty.name(), name = %expr.name, arity = args.len(), "resolve method");

            services
                .types
                .find_method(&ty, &expr.name, args.len())
                .ok_or_else(|| Error::UnresolvedMethod {
                    ty: ty.name().to_string(),
                    name: expr.name.clone(),
                    arity: args.len(),
                })
        },
    )?;

    let args = convert_args(services, args, method.params())?;
    method.invoke(&receiver, args)
}

fn eval_args<'a>(
    args: &'a [Expr],
    rt: &mut Runtime<'a>,
    this: &Value,
) -> Result<Vec<Value>, Error> {
    args.iter().map(|arg| eval(arg, rt, this)).collect()
}

/// Convert arguments to the declared parameter types.
/// Variadic arguments past the declared parameters are passed as is.
fn convert_args(
    services: &Services,
    args: Vec<Value>,
    params: &[Arc<Type>],
) -> Result<Vec<Value>, Error> {
    args.into_iter()
        .enumerate()
        .map(|(idx, arg)| match params.get(idx) {
            Some(param) => services.conversions.convert(arg, param),
            None => Ok(arg),
        })
        .collect()
}

/// Inline `fn(..) { .. }` closure.
/// Captures the state of the creating evaluation.
struct Closure {
    params: Vec<usize>,
    body: Arc<Expr>,
    this: Value,
    root: Value,
    variables: Arc<Variables>,
    slots: Vec<Value>,
    services: Services,
}

impl Callable for Closure {
    fn call(&self, args: Vec<Value>) -> Result<Value, Error> {
        let mut rt = Runtime::with_slots(
            self.root.clone(),
            self.variables.clone(),
            self.slots.clone(),
            self.services.clone(),
        );

        let mut args = args.into_iter();
        for slot in self.params.iter() {
            rt.set_slot(*slot, args.next().unwrap_or_default());
        }

        let value = eval(&self.body, &mut rt, &self.this)?;
        rt.clear_flags();
        Ok(value)
    }

    fn name(&self) -> &str {
        "fn"
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        expr::{
            Compiler, DebugContext,
            debug::{Breakpoint, BreakpointListener},
            position::LineCol,
        },
        service::DefaultTypeResolver,
        types::Type,
        value::Object,
    };
    use std::sync::Mutex;

    fn run(src: &str) -> Result<Value, Error> {
        crate::expr::eval(src, Value::Null, &Variables::new())
    }

    fn run_with(src: &str, root: Value, variables: &[(&str, Value)]) -> Result<Value, Error> {
        let variables = variables
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect::<Variables>();
        crate::expr::eval(src, root, &variables)
    }

    #[test]
    fn arithmetic_ops() {
        assert_eq!(run("7 / 2").unwrap(), Value::Int(3));
        assert_eq!(run("7 % 4").unwrap(), Value::Int(3));
        assert_eq!(run("7.0 / 2").unwrap(), Value::Float(3.5));
        assert_eq!(run("-(2 - 5)").unwrap(), Value::Int(3));
        assert_eq!(run("1 << 4").unwrap(), Value::Int(16));
        assert_eq!(run("-16 >> 2").unwrap(), Value::Int(-4));
        assert_eq!(run("-1 >>> 60").unwrap(), Value::Int(15));
        assert_eq!(run("6 & 3 | 8").unwrap(), Value::Int(10));
        assert_eq!(run("true ^ true").unwrap(), Value::Bool(false));
        assert_eq!(run("~5").unwrap(), Value::Int(-6));
        assert_eq!(run("2 mul 3 add 1").unwrap(), Value::Int(7));
    }

    #[test]
    fn arithmetic_errors() {
        assert!(matches!(run("9223372036854775807 + 1"), Err(Error::Overflow)));
        assert!(matches!(run("1 / 0"), Err(Error::Div0)));
        assert!(matches!(run("1 % 0"), Err(Error::Div0)));
        assert_eq!(run("(-9223372036854775807 - 1) % -1").unwrap(), Value::Int(0));
        assert!(matches!(
            run("(-9223372036854775807 - 1) / -1"),
            Err(Error::Overflow)
        ));
        assert!(matches!(run("true - 1"), Err(Error::InvalidOperation(_))));
        assert!(matches!(run("[1] < 2"), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn concatenation() {
        assert_eq!(run("'a' + 1").unwrap(), Value::string("a1"));
        assert_eq!(run("1.5 + 'b'").unwrap(), Value::string("1.5b"));
        assert_eq!(run("'x' + null").unwrap(), Value::string("xnull"));
    }

    #[test]
    fn comparison() {
        assert_eq!(run("'a' < 'b'").unwrap(), Value::Bool(true));
        assert_eq!(run("2 >= 2.0").unwrap(), Value::Bool(true));
        assert_eq!(run("null == null").unwrap(), Value::Bool(true));
        assert_eq!(run("1 == null").unwrap(), Value::Bool(false));
        assert_eq!(run("[1, 2] == [1, 2]").unwrap(), Value::Bool(true));
        assert_eq!(run("2 in [1, 2]").unwrap(), Value::Bool(true));
        assert_eq!(run("'k' not in {k: 1}").unwrap(), Value::Bool(false));
    }

    #[test]
    fn logical() {
        assert_eq!(run("1 && 'a'").unwrap(), Value::Bool(true));
        assert_eq!(run("0 or null").unwrap(), Value::Bool(false));
        assert_eq!(run("!0").unwrap(), Value::Bool(true));
        assert_eq!(run("null ?: 3").unwrap(), Value::Int(3));
        assert_eq!(run("0 ? 1 : 2").unwrap(), Value::Int(2));
    }

    #[test]
    fn like_and_is() {
        assert_eq!(run("'abc' like 'a.c'").unwrap(), Value::Bool(true));
        assert_eq!(run("'abcd' like 'a.c'").unwrap(), Value::Bool(false));
        assert_eq!(run("12 like '\\\\d+'").unwrap(), Value::Bool(true));
        assert_eq!(
            run_with("'xyz' like $p", Value::Null, &[("p", Value::string("x.*"))]).unwrap(),
            Value::Bool(true)
        );
        assert!(matches!(
            run_with("'x' like $p", Value::Null, &[("p", Value::string("("))]),
            Err(Error::InvalidOperation(_))
        ));

        assert_eq!(run("1 is @int@").unwrap(), Value::Bool(true));
        assert_eq!(run("1 is 'object'").unwrap(), Value::Bool(true));
        assert_eq!(run("'a' is @int@").unwrap(), Value::Bool(false));
        assert_eq!(run("null is @object@").unwrap(), Value::Bool(false));
    }

    #[test]
    fn casts_and_types() {
        assert_eq!(run("@int@('42')").unwrap(), Value::Int(42));
        assert_eq!(run("@string@(1.5)").unwrap(), Value::string("1.5"));
        assert_eq!(run("@int@(null)").unwrap(), Value::Null);
        assert!(matches!(run("@int@('x')"), Err(Error::Conversion { .. })));
        assert!(matches!(run("@nope@"), Err(Error::UnresolvedType(_))));

        let Value::Type(ty) = run("@long@").unwrap() else {
            panic!("expected a type");
        };
        assert_eq!(ty.name(), "int");
    }

    #[test]
    fn members() {
        assert_eq!(run("'hello'.length").unwrap(), Value::Int(5));
        assert_eq!(run("'hello'.substring(1, 3)").unwrap(), Value::string("el"));
        assert_eq!(run("[1, 2, 3].size()").unwrap(), Value::Int(3));
        assert_eq!(run("{a: 1}.a").unwrap(), Value::Int(1));
        assert_eq!(run("{a: 1}.missing").unwrap(), Value::Null);
        assert_eq!(run("{a: 1}['a']").unwrap(), Value::Int(1));
        assert_eq!(run("[4, 5][1]").unwrap(), Value::Int(5));
        assert!(matches!(
            run("'a'.nope"),
            Err(Error::UnresolvedProperty { name, .. }) if name == "nope"
        ));
        assert!(matches!(
            run("'a'.nope(1)"),
            Err(Error::UnresolvedMethod { arity: 1, .. })
        ));
        assert!(matches!(run("null.length"), Err(Error::NullReceiver { .. })));
        assert_eq!(run("null?.length").unwrap(), Value::Null);
    }

    #[test]
    fn statics_and_constructors() {
        assert_eq!(run("@int@.MAX_VALUE").unwrap(), Value::Int(i64::MAX));
        assert_eq!(run("new @list@().size()").unwrap(), Value::Int(0));
        assert!(matches!(
            run("new @int@(1, 2, 3)"),
            Err(Error::UnresolvedConstructor { arity: 3, .. })
        ));
    }

    #[test]
    fn assignments() {
        assert_eq!(run("$m = {}; $m.a = 1; $m['b'] = 2; $m").unwrap().to_string(), "{a: 1, b: 2}");
        assert_eq!(run("$l = [1, 2]; $l[0] = 'x'; $l").unwrap().to_string(), "[x, 2]");

        let b = crate::types::builtins();
        let point = Type::builder("geo.Point")
            .field("x", &b.int)
            .default_constructor()
            .build();
        let resolver = DefaultTypeResolver::new();
        resolver.register(point.clone());
        let services = Services::default().with_types(Arc::new(resolver));

        let compiled = Compiler::default()
            .expression("x = '3'; $p = new @geo.Point@(); $p.x = 4.9; [x, $p.x]")
            .unwrap();
        let root = Value::Object(Object::new(point));
        let value = compiled
            .execute_with(root, &Variables::new(), &services)
            .unwrap();
        assert_eq!(value, Value::list([Value::Int(3), Value::Int(4)]));
    }

    #[test]
    fn variables_and_refs() {
        let value = run_with(
            "[$a, a, $context.a, $root, $self]",
            Value::Int(7),
            &[("a", Value::Int(1))],
        )
        .unwrap();
        assert_eq!(
            value,
            Value::list([
                Value::Int(1),
                Value::Int(1),
                Value::Int(1),
                Value::Int(7),
                Value::Int(7),
            ])
        );
    }

    #[test]
    fn loops() {
        assert_eq!(
            run("$i = 0; $s = 0; while ($i < 5) { $i = $i + 1; if ($i == 2) { continue } $s = $s + $i }; $s")
                .unwrap(),
            Value::Int(13)
        );
        assert_eq!(
            run("$s = ''; for ($c in 'abc') { $s = $c + $s }; $s").unwrap(),
            Value::string("cba")
        );
        assert_eq!(run("for ($x : null) { $y = 1 }; $y").unwrap(), Value::Null);
        assert_eq!(run("$f = fn() { for ($x : [1, 2]) { return $x * 10 } }; $f.call()").unwrap(), Value::Int(10));
    }

    #[test]
    fn closures() {
        assert_eq!(
            run("$add = fn($a, $b) { $a + $b }; $add.call(2, 3)").unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            run("$k = 10; $f = fn($a) { return $a * $k; 0 }; $k = 0; $f.call(2)").unwrap(),
            Value::Int(20)
        );
        assert_eq!(run("fn($a) { $a }.call()").unwrap(), Value::Null);
        assert_eq!(
            run_with("fn() { $self + 1 }.call()", Value::Int(1), &[]).unwrap(),
            Value::Int(2)
        );
    }

    #[derive(Default)]
    struct Recorder {
        hits: Mutex<Vec<LineCol>>,
        errors: Mutex<Vec<Error>>,
    }

    impl BreakpointListener for Recorder {
        fn on_hit(&self, _breakpoint: &Breakpoint, start: LineCol, _end: LineCol) {
            self.hits.lock().unwrap().push(start);
        }

        fn on_error(&self, _breakpoint: &Breakpoint, error: &Error) {
            self.errors.lock().unwrap().push(error.clone());
        }
    }

    #[test]
    fn breakpoints() {
        let debug = DebugContext::new();
        let recorder = Arc::new(Recorder::default());
        debug.add_breakpoint(LineCol::new(2, 1), LineCol::new(2, 80), recorder.clone(), false);
        debug.add_breakpoint(LineCol::new(3, 1), LineCol::new(3, 80), recorder.clone(), true);

        let compiler = Compiler::default().with_debug(debug);
        let compiled = compiler.expression("$a = 1;\n$b = $a + 1;\n$a.nope").unwrap();
        let err = compiled.execute(Value::Null, &Variables::new()).unwrap_err();

        assert!(!recorder.hits.lock().unwrap().is_empty());
        assert!(recorder.hits.lock().unwrap().iter().all(|pos| pos.line == 2));

        let Error::Traced { trace, source } = &err else {
            panic!("expected a traced error");
        };
        assert!(matches!(**source, Error::UnresolvedProperty { .. }));
        assert!(trace.starts_with("at 3:"));
        assert!(trace.contains("(self = 1)"));

        let errors = recorder.errors.lock().unwrap();
        assert!(!errors.is_empty());
        assert!(errors.iter().all(Error::is_traced));
    }

    #[test]
    fn enclosing_statements_report_errors() {
        let debug = DebugContext::new();
        let recorder = Arc::new(Recorder::default());
        debug.add_breakpoint(LineCol::new(1, 1), LineCol::new(1, 80), recorder.clone(), true);

        let compiler = Compiler::default().with_debug(debug);
        let compiled = compiler.expression("if (true) {\n\n$a = 1; $a.nope }").unwrap();
        let err = compiled.execute(Value::Null, &Variables::new()).unwrap_err();
        assert!(err.is_traced());

        let errors = recorder.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        let Error::Traced { trace, .. } = &errors[0] else {
            panic!("expected a traced error");
        };
        assert!(trace.starts_with("at 3:"));
        assert!(recorder.hits.lock().unwrap().is_empty());
    }
}
