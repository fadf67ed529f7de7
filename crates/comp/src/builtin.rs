//! The builtin module: core tags, primitive shapes, and a small function
//! set every other module sees through its implicit `builtin` namespace.

use std::{cell::OnceCell, rc::Rc};

use bigdecimal::BigDecimal;

use crate::{
    fail,
    io::PrintWriter,
    module::{FunctionBody, FunctionDefinition, Module, ModuleId},
    morph::MorphMode,
    structure::Structure,
    tag::TagDefinition,
    value::Value,
};

/// Cached pieces of the builtin module that hot paths reach for directly.
struct BuiltinCache {
    module: Rc<Module>,
    true_tag: Rc<TagDefinition>,
    false_tag: Rc<TagDefinition>,
    fail_tag: Rc<TagDefinition>,
}

thread_local! {
    /// The engine is single-threaded; the singleton lives per thread and is
    /// never mutated after creation.
    static BUILTIN: OnceCell<BuiltinCache> = const { OnceCell::new() };
}

fn with_cache<R>(f: impl FnOnce(&BuiltinCache) -> R) -> R {
    BUILTIN.with(|cell| f(cell.get_or_init(create)))
}

fn create() -> BuiltinCache {
    let module = Module::new_builtin();

    let owned = |parts: &[&str]| -> Vec<String> { parts.iter().map(|s| (*s).to_owned()).collect() };

    // Core tags.
    let true_tag = module.define_tag(&owned(&["true"]));
    let false_tag = module.define_tag(&owned(&["false"]));
    module.define_tag(&owned(&["nil"]));
    let fail_tag = module.define_tag(&owned(&["fail"]));
    for child in ["runtime", "type", "div_zero", "not_found", "ambiguous"] {
        module.define_tag(&owned(&["fail", child]));
    }

    // Primitive shapes. Placeholders: the morph engine recognizes them by
    // path and applies the primitive rules instead of field matching.
    for name in ["num", "str", "bool", "any", "tag"] {
        let shape = module.define_shape(&owned(&[name]), Vec::new());
        shape.replace_fields(Vec::new());
    }

    // Native functions.
    for function in BuiltinFunction::ALL {
        module.define_function(FunctionDefinition::new(
            owned(&[function.name()]),
            FunctionBody::Builtin(function),
            MorphMode::Normal,
            false,
            Some(function.doc().to_owned()),
            module.id().clone(),
        ));
    }

    crate::prepare::build_resolution_table(&module);
    module.mark_prepared();

    BuiltinCache {
        module,
        true_tag,
        false_tag,
        fail_tag,
    }
}

/// The process-wide builtin module, created lazily on first use.
#[must_use]
pub fn builtin_module() -> Rc<Module> {
    with_cache(|cache| Rc::clone(&cache.module))
}

pub(crate) fn builtin_module_id() -> ModuleId {
    with_cache(|cache| cache.module.id().clone())
}

pub(crate) fn bool_tag(value: bool) -> Rc<TagDefinition> {
    with_cache(|cache| {
        if value {
            Rc::clone(&cache.true_tag)
        } else {
            Rc::clone(&cache.false_tag)
        }
    })
}

pub(crate) fn fail_tag() -> Rc<TagDefinition> {
    with_cache(|cache| Rc::clone(&cache.fail_tag))
}

pub(crate) fn fail_child_tag(name: &str) -> Rc<TagDefinition> {
    with_cache(|cache| {
        cache
            .module
            .tag_by_path(&["fail".to_owned(), name.to_owned()])
            .unwrap_or_else(|| Rc::clone(&cache.fail_tag))
    })
}

/// Whether a tag is `#fail` or reachable from it through the hierarchy.
pub(crate) fn is_fail_tag(tag: &Rc<TagDefinition>) -> bool {
    let fail = fail_tag();
    tag.hierarchy_distance(&fail).is_some()
}

/// `#true`/`#false` back to a bool; `None` for any other tag.
pub(crate) fn tag_to_bool(tag: &Rc<TagDefinition>) -> Option<bool> {
    with_cache(|cache| {
        if Rc::ptr_eq(tag, &cache.true_tag) {
            Some(true)
        } else if Rc::ptr_eq(tag, &cache.false_tag) {
            Some(false)
        } else {
            None
        }
    })
}

/// Native functions of the builtin module.
///
/// Bodies run inline in the calling frame; none of them suspends on a child
/// computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinFunction {
    Print,
    Identity,
    Double,
    Add,
    Wrap,
}

impl BuiltinFunction {
    const ALL: [Self; 5] = [Self::Print, Self::Identity, Self::Double, Self::Add, Self::Wrap];

    fn name(self) -> &'static str {
        self.into()
    }

    fn doc(self) -> &'static str {
        match self {
            Self::Print => "Write the value to the host output and pass it through.",
            Self::Identity => "Pass the value through unchanged.",
            Self::Double => "Double a number.",
            Self::Add => "Add the argument n to a number.",
            Self::Wrap => "Wrap the value in a structure under the argument key.",
        }
    }

    /// Runs the function against the pipeline value.
    pub(crate) fn call(self, input: &Value, args: Option<&Value>, print: &mut dyn PrintWriter) -> Value {
        match self {
            Self::Print => {
                print.write(&format!("{input}"));
                print.push('\n');
                input.clone()
            }
            Self::Identity => input.clone(),
            Self::Double => match input.as_scalar().as_number() {
                Some(n) => Value::number(n * BigDecimal::from(2)),
                None => fail::type_err(format!("|double expects a number, got {}", input.kind())),
            },
            Self::Add => {
                let Some(n) = arg_field(args, "n").as_ref().and_then(Value::as_number).cloned() else {
                    return fail::type_err("|add expects a numeric argument n");
                };
                match input.as_scalar().as_number() {
                    Some(value) => Value::number(value + n),
                    None => fail::type_err(format!("|add expects a number, got {}", input.kind())),
                }
            }
            Self::Wrap => {
                let Some(key) = arg_field(args, "key").as_ref().and_then(|v| v.as_text().map(ToOwned::to_owned))
                else {
                    return fail::type_err("|wrap expects a text argument key");
                };
                let mut fields = Structure::with_capacity(1);
                fields.insert_named(&key, input.clone());
                Value::structure(fields)
            }
        }
    }
}

/// Pulls a named argument, falling back to the sole positional one.
fn arg_field(args: Option<&Value>, name: &str) -> Option<Value> {
    let args = args?;
    let fields = args.as_struct_ref()?;
    if let Some(value) = fields.get_named(name) {
        return Some(value.clone());
    }
    fields.sole_value().cloned()
}
