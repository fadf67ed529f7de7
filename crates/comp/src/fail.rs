//! Constructors for runtime failure values.
//!
//! Failures are ordinary structures carrying at least a `message` field,
//! tagged `#fail` or one of its descendants. They flow through the engine as
//! values; nothing here is a Rust error.

use std::rc::Rc;

use crate::{builtin, structure::Structure, tag::TagDefinition, value::Value};

fn tagged(tag: Rc<TagDefinition>, message: String) -> Value {
    let mut fields = Structure::with_capacity(1);
    fields.insert_named("message", Value::text(message));
    Value::structure(fields).with_tag(tag)
}

/// A generic `#fail` with the given message.
#[must_use]
pub fn fail(message: impl Into<String>) -> Value {
    tagged(builtin::fail_tag(), message.into())
}

/// `#fail.runtime` — generic evaluation failure.
#[must_use]
pub fn runtime(message: impl Into<String>) -> Value {
    tagged(builtin::fail_child_tag("runtime"), message.into())
}

/// `#fail.type` — operand or morph type mismatch.
#[must_use]
pub fn type_err(message: impl Into<String>) -> Value {
    tagged(builtin::fail_child_tag("type"), message.into())
}

/// `#fail.div_zero`.
#[must_use]
pub fn div_zero(message: impl Into<String>) -> Value {
    tagged(builtin::fail_child_tag("div_zero"), message.into())
}

/// `#fail.not_found` — missing field or index out of bounds.
#[must_use]
pub fn not_found(message: impl Into<String>) -> Value {
    tagged(builtin::fail_child_tag("not_found"), message.into())
}

/// `#fail.ambiguous` — ambiguous dispatch or tag-field placement.
#[must_use]
pub fn ambiguous(message: impl Into<String>) -> Value {
    tagged(builtin::fail_child_tag("ambiguous"), message.into())
}
