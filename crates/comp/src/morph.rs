//! Shape-directed reshaping of values.
//!
//! A morph matches a value against a shape, producing a score and (on
//! success) the reshaped value. The same scoring drives union variant
//! selection and function overload dispatch.

use std::rc::Rc;

use crate::{
    module::FunctionDefinition,
    shape::{FieldConstraint, Primitive, ShapeDefinition, ShapeField},
    structure::{FieldKey, Structure},
    value::Value,
};

/// Strictness of a morph.
///
/// | mode | extra fields | missing named fields | defaults |
/// |---|---|---|---|
/// | `Normal` | kept | fail unless default | applied |
/// | `Strong` | fail | fail unless default | applied |
/// | `Weak`   | dropped | allowed | not applied |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MorphMode {
    #[default]
    Normal,
    Strong,
    Weak,
}

/// Strictness of a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskMode {
    /// Keep the intersection, drop the rest, no defaults.
    #[default]
    Permissive,
    /// Validate: extras fail, missing required fields fail, defaults apply.
    Strict,
}

/// Outcome of a morph or mask.
///
/// The four score components compare lexicographically; `positional_matches`
/// is `-1` when no match was attempted, so any attempted match outranks a
/// failure. A result is a success exactly when it produced a value.
#[derive(Debug, Clone)]
pub struct MorphResult {
    pub named_matches: u32,
    pub tag_depth: u32,
    pub assignment_weight: u32,
    pub positional_matches: i32,
    value: Option<Value>,
    reason: Option<String>,
}

impl MorphResult {
    pub(crate) fn failure(reason: impl Into<String>) -> Self {
        Self {
            named_matches: 0,
            tag_depth: 0,
            assignment_weight: 0,
            positional_matches: -1,
            value: None,
            reason: Some(reason.into()),
        }
    }

    pub fn success(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<Value> {
        self.value
    }

    /// Why the morph failed, for failure messages.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Score tuple compared lexicographically.
    #[must_use]
    pub fn score(&self) -> (u32, u32, u32, i32) {
        (
            self.named_matches,
            self.tag_depth,
            self.assignment_weight,
            self.positional_matches,
        )
    }
}

/// Score contribution of one field pairing.
#[derive(Debug, Clone, Copy, Default)]
struct Scores {
    named: u32,
    tag_depth: u32,
    weight: u32,
    positional: u32,
}

impl Scores {
    fn add(&mut self, other: Scores) {
        self.named += other.named;
        self.tag_depth += other.tag_depth;
        self.weight += other.weight;
        self.positional += other.positional;
    }
}

/// Morphs `value` against `shape` in normal mode.
pub fn morph(value: &Value, shape: &Rc<ShapeDefinition>) -> MorphResult {
    morph_with_mode(value, shape, MorphMode::Normal)
}

/// Morphs in strong mode: extra fields fail.
pub fn strong_morph(value: &Value, shape: &Rc<ShapeDefinition>) -> MorphResult {
    morph_with_mode(value, shape, MorphMode::Strong)
}

/// Morphs in weak mode: extras drop, missing fields pass, no defaults.
pub fn weak_morph(value: &Value, shape: &Rc<ShapeDefinition>) -> MorphResult {
    morph_with_mode(value, shape, MorphMode::Weak)
}

pub fn morph_with_mode(value: &Value, shape: &Rc<ShapeDefinition>, mode: MorphMode) -> MorphResult {
    if shape.is_union() {
        return best_variant(shape, |variant| morph_with_mode(value, variant, mode));
    }
    if let Some(primitive) = shape.primitive() {
        return primitive_morph(value, primitive);
    }
    structural_morph(value, shape, mode)
}

/// Union shapes try every variant; the strictly best score wins, so the
/// first-declared variant keeps ties.
fn best_variant(
    shape: &Rc<ShapeDefinition>,
    attempt: impl Fn(&Rc<ShapeDefinition>) -> MorphResult,
) -> MorphResult {
    let members = shape.union_members();
    if members.is_empty() {
        return MorphResult::failure(format!("union {shape} has no variants"));
    }
    let mut best: Option<MorphResult> = None;
    for member in &members {
        let candidate = attempt(member);
        if !candidate.success() {
            continue;
        }
        match &best {
            Some(current) if candidate.score() <= current.score() => {}
            _ => best = Some(candidate),
        }
    }
    best.unwrap_or_else(|| MorphResult::failure(format!("no variant of {shape} matched")))
}

/// Matching for the builtin placeholder shapes.
fn primitive_morph(value: &Value, primitive: Primitive) -> MorphResult {
    let scalar = value.as_scalar();
    let ok = match primitive {
        Primitive::Num => scalar.is_number(),
        Primitive::Str => scalar.is_text(),
        Primitive::Bool => scalar.as_bool().is_some(),
        Primitive::Tag => scalar.is_tag(),
        Primitive::Any => true,
    };
    if ok {
        MorphResult {
            named_matches: 0,
            tag_depth: 0,
            assignment_weight: 1,
            positional_matches: 0,
            value: Some(scalar),
            reason: None,
        }
    } else {
        MorphResult::failure(format!("{} is not ~{primitive}", scalar.kind()))
    }
}

/// The single-variant structural algorithm: named matching, positional
/// pairing, defaults, extras, with type checks on every pairing.
fn structural_morph(value: &Value, shape: &Rc<ShapeDefinition>, mode: MorphMode) -> MorphResult {
    let wrapped = value.as_struct();
    let entries = wrapped.as_struct_ref().expect("as_struct yields a structure");
    let fields = shape.fields();

    let mut consumed = vec![false; entries.len()];
    let mut filled: Vec<Option<(FieldKey, Value)>> = vec![None; fields.len()];
    let mut total = Scores::default();

    // Phase A: named matching.
    for (slot, field) in fields.iter().enumerate() {
        let Some(name) = field.name() else { continue };
        let Some(found) = entries.iter().position(|(key, _)| key.as_text() == Some(name)) else {
            continue;
        };
        let (_, entry_value) = entries.entry_at(found).expect("position within bounds");
        match check_type(entry_value, field, mode) {
            Ok((coerced, scores)) => {
                consumed[found] = true;
                filled[slot] = Some((FieldKey::text(name), coerced));
                total.named += 1;
                total.add(scores);
            }
            Err(reason) => return MorphResult::failure(reason),
        }
    }

    // Phase B: positional pairing. Bare tags place greedily into tag-typed
    // fields of their hierarchy; everything else pairs with the first
    // unfilled shape field in declaration order.
    for (index, (key, entry_value)) in entries.iter().enumerate() {
        if consumed[index] || key.is_named() {
            continue;
        }
        if let Some(tag) = entry_value.as_tag() {
            let candidates: Vec<(usize, u32)> = fields
                .iter()
                .enumerate()
                .filter(|(slot, _)| filled[*slot].is_none())
                .filter_map(|(slot, field)| match field.constraint() {
                    FieldConstraint::Tag(constraint) => constraint
                        .resolved()
                        .and_then(|target| tag.hierarchy_distance(target))
                        .map(|distance| (slot, distance)),
                    _ => None,
                })
                .collect();
            match candidates.as_slice() {
                [] => {} // falls through to plain positional pairing
                [(slot, distance)] => {
                    let field = &fields[*slot];
                    let result_key = field.name().map_or_else(|| key.clone(), FieldKey::text);
                    filled[*slot] = Some((result_key, entry_value.clone()));
                    consumed[index] = true;
                    total.positional += 1;
                    total.tag_depth += *distance;
                    continue;
                }
                _ => {
                    return MorphResult::failure(format!(
                        "tag {tag} matches more than one unfilled field of {shape}"
                    ));
                }
            }
        }
        let Some(slot) = filled.iter().position(Option::is_none) else {
            continue; // no shape field left; stays as an extra
        };
        let field = &fields[slot];
        if field.is_array() {
            match collect_array(field, entries, &mut consumed, index, mode) {
                Ok((collected, count, scores)) => {
                    filled[slot] = Some((
                        field.name().map_or_else(FieldKey::unnamed, FieldKey::text),
                        collected,
                    ));
                    total.positional += count;
                    total.add(scores);
                    continue;
                }
                Err(reason) => return MorphResult::failure(reason),
            }
        }
        match check_type(entry_value, field, mode) {
            Ok((coerced, scores)) => {
                let result_key = field.name().map_or_else(|| key.clone(), FieldKey::text);
                filled[slot] = Some((result_key, coerced));
                consumed[index] = true;
                total.positional += 1;
                total.add(scores);
            }
            Err(reason) => return MorphResult::failure(reason),
        }
    }

    // Phase C: defaults, then required-field enforcement.
    for (slot, field) in fields.iter().enumerate() {
        if filled[slot].is_some() {
            continue;
        }
        if mode != MorphMode::Weak
            && let Some(default) = field.default()
        {
            let key = field.name().map_or_else(FieldKey::unnamed, FieldKey::text);
            filled[slot] = Some((key, default.clone()));
            total.weight += 1;
            continue;
        }
        if mode != MorphMode::Weak {
            let describe = field.name().unwrap_or("positional field");
            return MorphResult::failure(format!("missing required field {describe} of {shape}"));
        }
    }

    // Phase D: extras.
    let extras: Vec<(FieldKey, Value)> = entries
        .iter()
        .enumerate()
        .filter(|(index, _)| !consumed[*index])
        .map(|(_, (key, entry_value))| (key.clone(), entry_value.clone()))
        .collect();
    if !extras.is_empty() && mode == MorphMode::Strong {
        return MorphResult::failure(format!("{} extra fields not in {shape}", extras.len()));
    }

    let mut result = Structure::with_capacity(filled.len());
    for slot in filled.into_iter().flatten() {
        result.insert(slot.0, slot.1);
    }
    if mode == MorphMode::Normal {
        for (key, extra) in extras {
            result.insert(key, extra);
        }
    }

    MorphResult {
        named_matches: total.named,
        tag_depth: total.tag_depth,
        assignment_weight: total.weight,
        positional_matches: i32::try_from(total.positional).unwrap_or(i32::MAX),
        value: Some(Value::structure(result)),
        reason: None,
    }
}

/// Gathers the remaining unconsumed positional entries into an array field,
/// honoring its cardinality bounds.
fn collect_array(
    field: &ShapeField,
    entries: &Structure,
    consumed: &mut [bool],
    start: usize,
    mode: MorphMode,
) -> Result<(Value, u32, Scores), String> {
    let mut collected = Structure::new();
    let mut scores = Scores::default();
    let mut count = 0usize;
    for (index, (key, entry_value)) in entries.iter().enumerate().skip(start) {
        if consumed[index] || key.is_named() {
            continue;
        }
        if field.array_max().is_some_and(|max| count >= max) {
            break;
        }
        let (coerced, s) = check_type(entry_value, field, mode)?;
        collected.insert(key.clone(), coerced);
        scores.add(s);
        consumed[index] = true;
        count += 1;
    }
    if let Some(min) = field.array_min()
        && count < min
    {
        return Err(format!("array field needs at least {min} values, got {count}"));
    }
    Ok((Value::structure(collected), u32::try_from(count).unwrap_or(u32::MAX), scores))
}

/// Type-checks one pairing, returning the (possibly reshaped) value and the
/// score it contributes.
fn check_type(value: &Value, field: &ShapeField, mode: MorphMode) -> Result<(Value, Scores), String> {
    match field.constraint() {
        FieldConstraint::Any => Ok((value.clone(), Scores::default())),
        FieldConstraint::Shape(shape_ref) => {
            let Some(target) = shape_ref.resolved() else {
                return Err(format!("unresolved shape reference ~{}", shape_ref.display_path()));
            };
            if let Some(primitive) = target.primitive() {
                let result = primitive_morph(value, primitive);
                return match result.into_value() {
                    Some(coerced) => Ok((coerced, Scores::default())),
                    None => Err(format!("{} is not ~{primitive}", value.kind())),
                };
            }
            let nested = morph_with_mode(value, target, mode);
            let score = nested.score();
            match nested.into_value() {
                Some(coerced) => Ok((
                    coerced,
                    Scores {
                        named: score.0,
                        tag_depth: score.1,
                        weight: score.2,
                        positional: u32::try_from(score.3).unwrap_or(0),
                    },
                )),
                None => Err(format!("{} does not morph to {target}", value.kind())),
            }
        }
        FieldConstraint::Tag(tag_ref) => {
            let Some(target) = tag_ref.resolved() else {
                return Err(format!("unresolved tag reference #{}", tag_ref.display_path()));
            };
            let Some(tag) = value.as_tag() else {
                return Err(format!("{} is not a tag of {target}", value.kind()));
            };
            match tag.hierarchy_distance(target) {
                Some(distance) => Ok((
                    value.clone(),
                    Scores {
                        tag_depth: distance,
                        ..Scores::default()
                    },
                )),
                None => Err(format!("{tag} is outside the {target} hierarchy")),
            }
        }
        FieldConstraint::Handle(handle_ref) => {
            let Some(target) = handle_ref.resolved() else {
                return Err(format!("unresolved handle reference @{}", handle_ref.display_path()));
            };
            let Some(instance) = value.as_handle() else {
                return Err(format!("{} is not a handle of {target}", value.kind()));
            };
            if instance.is_released() {
                return Err(format!("handle {instance} has been released"));
            }
            match instance.kind().hierarchy_distance(target) {
                Some(distance) => Ok((
                    value.clone(),
                    Scores {
                        tag_depth: distance,
                        ..Scores::default()
                    },
                )),
                None => Err(format!("{instance} is not a {target}")),
            }
        }
    }
}

/// Permissive mask: keep the named fields the shape also names (and
/// accepts), drop everything else. No defaults, no failures for missing
/// fields; non-structures fail.
pub fn mask(value: &Value, shape: &Rc<ShapeDefinition>) -> MorphResult {
    if shape.is_union() {
        return best_variant(shape, |variant| mask(value, variant));
    }
    let Some(entries) = value.as_struct_ref() else {
        return MorphResult::failure(format!("cannot mask {} with {shape}", value.kind()));
    };
    let fields = shape.fields();
    let mut result = Structure::new();
    let mut named_matches = 0u32;
    for (key, entry_value) in entries.iter() {
        let Some(name) = key.as_text() else { continue };
        let accepted = fields
            .iter()
            .filter(|field| field.name() == Some(name))
            .any(|field| check_type(entry_value, field, MorphMode::Weak).is_ok());
        if accepted {
            result.insert(key.clone(), entry_value.clone());
            named_matches += 1;
        }
    }
    MorphResult {
        named_matches,
        tag_depth: 0,
        assignment_weight: 0,
        positional_matches: 0,
        value: Some(Value::structure(result)),
        reason: None,
    }
}

/// Strict mask: named fields validate like a strong morph, defaults apply,
/// and positional entries are only allowed where the shape itself declares
/// positional fields. Anything left over fails.
pub fn strict_mask(value: &Value, shape: &Rc<ShapeDefinition>) -> MorphResult {
    if shape.is_union() {
        return best_variant(shape, |variant| strict_mask(value, variant));
    }
    let Some(entries) = value.as_struct_ref() else {
        return MorphResult::failure(format!("cannot mask {} with {shape}", value.kind()));
    };
    let fields = shape.fields();
    let mut consumed = vec![false; entries.len()];
    let mut filled: Vec<Option<(FieldKey, Value)>> = vec![None; fields.len()];
    let mut total = Scores::default();

    for (slot, field) in fields.iter().enumerate() {
        let Some(name) = field.name() else { continue };
        let Some(found) = entries.iter().position(|(key, _)| key.as_text() == Some(name)) else {
            continue;
        };
        let (_, entry_value) = entries.entry_at(found).expect("position within bounds");
        match check_type(entry_value, field, MorphMode::Normal) {
            Ok((coerced, scores)) => {
                consumed[found] = true;
                filled[slot] = Some((FieldKey::text(name), coerced));
                total.named += 1;
                total.add(scores);
            }
            Err(reason) => return MorphResult::failure(reason),
        }
    }

    for (index, (key, entry_value)) in entries.iter().enumerate() {
        if consumed[index] || key.is_named() {
            continue;
        }
        let Some(slot) = fields
            .iter()
            .enumerate()
            .position(|(slot, field)| field.is_positional() && filled[slot].is_none())
        else {
            return MorphResult::failure(format!("positional field not allowed by {shape}"));
        };
        match check_type(entry_value, &fields[slot], MorphMode::Normal) {
            Ok((coerced, scores)) => {
                consumed[index] = true;
                filled[slot] = Some((key.clone(), coerced));
                total.positional += 1;
                total.add(scores);
            }
            Err(reason) => return MorphResult::failure(reason),
        }
    }

    if let Some((index, _)) = consumed.iter().enumerate().find(|(_, done)| !**done) {
        let (key, _) = entries.entry_at(index).expect("position within bounds");
        return MorphResult::failure(format!("field {key} not allowed by {shape}"));
    }

    for (slot, field) in fields.iter().enumerate() {
        if filled[slot].is_some() {
            continue;
        }
        if let Some(default) = field.default() {
            let key = field.name().map_or_else(FieldKey::unnamed, FieldKey::text);
            filled[slot] = Some((key, default.clone()));
            total.weight += 1;
        } else {
            let describe = field.name().unwrap_or("positional field");
            return MorphResult::failure(format!("missing required field {describe} of {shape}"));
        }
    }

    let mut result = Structure::with_capacity(filled.len());
    for slot in filled.into_iter().flatten() {
        result.insert(slot.0, slot.1);
    }
    MorphResult {
        named_matches: total.named,
        tag_depth: total.tag_depth,
        assignment_weight: total.weight,
        positional_matches: i32::try_from(total.positional).unwrap_or(i32::MAX),
        value: Some(Value::structure(result)),
        reason: None,
    }
}

/// Masks with an explicit mode.
pub fn mask_with_mode(value: &Value, shape: &Rc<ShapeDefinition>, mode: MaskMode) -> MorphResult {
    match mode {
        MaskMode::Permissive => mask(value, shape),
        MaskMode::Strict => strict_mask(value, shape),
    }
}

/// Outcome of overload dispatch.
#[derive(Debug)]
pub(crate) enum DispatchOutcome {
    Selected {
        definition: Rc<FunctionDefinition>,
        morphed: Value,
    },
    NoMatch,
    Ambiguous,
}

/// Scores the pipeline input against every overload and selects the best.
///
/// Each overload is scored with its own declared mode; an overload without
/// an input shape accepts anything at the minimal successful score. Exact
/// score ties between two successes are an ambiguity, not a pick.
pub(crate) fn dispatch(input: &Value, overloads: &[Rc<FunctionDefinition>]) -> DispatchOutcome {
    let mut best: Option<(Rc<FunctionDefinition>, MorphResult)> = None;
    let mut tied = false;
    for overload in overloads {
        let result = match overload.input_shape() {
            Some(shape) => morph_with_mode(input, shape, overload.mode()),
            None => MorphResult {
                named_matches: 0,
                tag_depth: 0,
                assignment_weight: 0,
                positional_matches: 0,
                value: Some(input.clone()),
                reason: None,
            },
        };
        if !result.success() {
            continue;
        }
        match &best {
            Some((_, current)) if result.score() == current.score() => tied = true,
            Some((_, current)) if result.score() < current.score() => {}
            _ => {
                tied = false;
                best = Some((Rc::clone(overload), result));
            }
        }
    }
    match best {
        None => DispatchOutcome::NoMatch,
        Some(_) if tied => DispatchOutcome::Ambiguous,
        Some((definition, result)) => {
            let morphed = result.into_value().expect("successful dispatch carries a value");
            DispatchOutcome::Selected { definition, morphed }
        }
    }
}
