//! Typed values carried by cells.

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use crate::fingerprint::FingerprintHasher;
use crate::geometry::{Box2i, V2i};

/// Declared type of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Boolean.
    Bool,
    /// 64-bit integer.
    Int,
    /// 32-bit float.
    Float,
    /// Immutable string.
    String,
    /// Integer vector.
    V2i,
    /// Integer rectangle.
    Box2i,
    /// Three-component color. Cells of this type are compounds with `r`, `g`, `b` children.
    Color3f,
    /// Ordered list of strings.
    StringVector,
    /// Float buffer, used for tiles of channel data.
    FloatVector,
    /// Monolithic external object, possibly absent.
    Object,
    /// Grouping of named child cells without a value of its own.
    Compound,
}

impl ValueType {
    /// Name used as hash seed and in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Bool => "Bool",
            ValueType::Int => "Int",
            ValueType::Float => "Float",
            ValueType::String => "String",
            ValueType::V2i => "V2i",
            ValueType::Box2i => "Box2i",
            ValueType::Color3f => "Color3f",
            ValueType::StringVector => "StringVector",
            ValueType::FloatVector => "FloatVector",
            ValueType::Object => "Object",
            ValueType::Compound => "Compound",
        }
    }

    /// Value an input of this type holds when nothing else was declared.
    ///
    /// Compound cells have no value of their own and return `None`.
    pub fn default_value(self) -> Option<Value> {
        Some(match self {
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::String => Value::String(Arc::from("")),
            ValueType::V2i => Value::V2i(V2i::default()),
            ValueType::Box2i => Value::Box2i(Box2i::EMPTY),
            ValueType::Color3f => Value::Color3f([0.0; 3]),
            ValueType::StringVector => Value::StringVector(Arc::from(Vec::<String>::new())),
            ValueType::FloatVector => Value::FloatVector(Arc::from(Vec::<f32>::new())),
            ValueType::Object => Value::Object(None),
            ValueType::Compound => return None,
        })
    }

    /// Returns true for types whose cells own child cells.
    pub fn is_compound(self) -> bool {
        matches!(self, ValueType::Color3f | ValueType::Compound)
    }
}

/// A monolithic, externally produced object (an image, a scene).
///
/// Objects travel through the graph behind `Arc` and are never mutated once produced.
pub trait Object: Debug + Send + Sync + 'static {
    /// Short type name for diagnostics.
    fn type_name(&self) -> &'static str;

    /// Append the object's full content to a fingerprint.
    fn hash_into(&self, hasher: &mut FingerprintHasher);

    /// Approximate heap footprint in bytes, used for cache accounting.
    fn memory_usage(&self) -> usize;

    /// Upcast for downcasting by reference.
    fn as_any(&self) -> &dyn Any;

    /// Upcast for downcasting a shared handle.
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Downcast a shared object to its concrete type.
pub fn downcast_object<T: Object>(object: &Arc<dyn Object>) -> Option<Arc<T>> {
    Arc::clone(object).into_any_arc().downcast::<T>().ok()
}

/// A value held by an input cell or produced by an output cell.
#[derive(Debug, Clone)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f32),
    /// String.
    String(Arc<str>),
    /// Integer vector.
    V2i(V2i),
    /// Integer rectangle.
    Box2i(Box2i),
    /// Color, `[r, g, b]`.
    Color3f([f32; 3]),
    /// String list.
    StringVector(Arc<[String]>),
    /// Float buffer.
    FloatVector(Arc<[f32]>),
    /// Object, `None` when absent.
    Object(Option<Arc<dyn Object>>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::V2i(a), Value::V2i(b)) => a == b,
            (Value::Box2i(a), Value::Box2i(b)) => a == b,
            (Value::Color3f(a), Value::Color3f(b)) => {
                a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Value::StringVector(a), Value::StringVector(b)) => a == b,
            (Value::FloatVector(a), Value::FloatVector(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.len() == b.len()
                        && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()))
            }
            (Value::Object(a), Value::Object(b)) => match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            },
            _ => false,
        }
    }
}

impl Value {
    /// Type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::V2i(_) => ValueType::V2i,
            Value::Box2i(_) => ValueType::Box2i,
            Value::Color3f(_) => ValueType::Color3f,
            Value::StringVector(_) => ValueType::StringVector,
            Value::FloatVector(_) => ValueType::FloatVector,
            Value::Object(_) => ValueType::Object,
        }
    }

    /// Append the value's content to a fingerprint.
    pub fn hash_into(&self, hasher: &mut FingerprintHasher) {
        match self {
            Value::Bool(v) => {
                hasher.append_bool(*v);
            }
            Value::Int(v) => {
                hasher.append_i64(*v);
            }
            Value::Float(v) => {
                hasher.append_f32(*v);
            }
            Value::String(v) => {
                hasher.append_str(v);
            }
            Value::V2i(v) => {
                hasher.append_i32(v.x).append_i32(v.y);
            }
            Value::Box2i(v) => {
                hasher
                    .append_i32(v.min.x)
                    .append_i32(v.min.y)
                    .append_i32(v.max.x)
                    .append_i32(v.max.y);
            }
            Value::Color3f(v) => {
                hasher.append_f32(v[0]).append_f32(v[1]).append_f32(v[2]);
            }
            Value::StringVector(v) => {
                hasher.append_u64(v.len() as u64);
                for s in v.iter() {
                    hasher.append_str(s);
                }
            }
            Value::FloatVector(v) => {
                hasher.append_floats(v);
            }
            Value::Object(None) => {
                hasher.append_bool(false);
            }
            Value::Object(Some(object)) => {
                hasher.append_bool(true).append_str(object.type_name());
                object.hash_into(hasher);
            }
        }
    }

    /// Approximate footprint in bytes.
    pub fn memory_usage(&self) -> usize {
        let heap = match self {
            Value::String(v) => v.len(),
            Value::StringVector(v) => v.iter().map(|s| s.len() + std::mem::size_of::<String>()).sum(),
            Value::FloatVector(v) => v.len() * std::mem::size_of::<f32>(),
            Value::Object(Some(object)) => object.memory_usage(),
            _ => 0,
        };
        std::mem::size_of::<Value>() + heap
    }

    /// Typed view of this value.
    pub fn get<T: FromValue>(&self) -> Option<T> {
        T::from_value(self)
    }
}

/// Extraction of a concrete Rust type out of a [`Value`].
pub trait FromValue: Sized {
    /// The cell type this Rust type is read from.
    const TYPE: ValueType;

    /// Returns `None` if the value has a different type.
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! value_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromValue for $ty {
                const TYPE: ValueType = ValueType::$variant;

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

value_conversions! {
    bool => Bool,
    i64 => Int,
    f32 => Float,
    Arc<str> => String,
    V2i => V2i,
    Box2i => Box2i,
    [f32; 3] => Color3f,
    Arc<[String]> => StringVector,
    Arc<[f32]> => FloatVector,
    Option<Arc<dyn Object>> => Object,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::StringVector(Arc::from(value))
    }
}

impl From<Vec<f32>> for Value {
    fn from(value: Vec<f32>) -> Self {
        Value::FloatVector(Arc::from(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<Arc<dyn Object>> for Value {
    fn from(value: Arc<dyn Object>) -> Self {
        Value::Object(Some(value))
    }
}
