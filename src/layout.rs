use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Element type of a layout field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl FieldType {
    pub fn size(&self) -> usize {
        match self {
            FieldType::Bool | FieldType::I8 | FieldType::U8 => 1,
            FieldType::I16 | FieldType::U16 => 2,
            FieldType::I32 | FieldType::U32 | FieldType::F32 => 4,
            FieldType::I64 | FieldType::U64 | FieldType::F64 => 8,
        }
    }
}

/// Rust value types usable as layout fields.
pub trait LayoutValue: Copy + Default {
    const FIELD_TYPE: FieldType;
    const SIZE: usize;
    fn write_le(self, buf: &mut [u8]);
    fn read_le(buf: &[u8]) -> Self;
}

macro_rules! layout_value {
    ($ty:ty, $field_type:expr) => {
        impl LayoutValue for $ty {
            const FIELD_TYPE: FieldType = $field_type;
            const SIZE: usize = std::mem::size_of::<$ty>();
            fn write_le(self, buf: &mut [u8]) {
                buf.copy_from_slice(&self.to_le_bytes());
            }
            fn read_le(buf: &[u8]) -> Self {
                Self::from_le_bytes(buf.try_into().expect("slice length"))
            }
        }
    };
}

layout_value!(i8, FieldType::I8);
layout_value!(u8, FieldType::U8);
layout_value!(i16, FieldType::I16);
layout_value!(u16, FieldType::U16);
layout_value!(i32, FieldType::I32);
layout_value!(u32, FieldType::U32);
layout_value!(i64, FieldType::I64);
layout_value!(u64, FieldType::U64);
layout_value!(f32, FieldType::F32);
layout_value!(f64, FieldType::F64);

impl LayoutValue for bool {
    const FIELD_TYPE: FieldType = FieldType::Bool;
    const SIZE: usize = 1;
    fn write_le(self, buf: &mut [u8]) {
        buf[0] = self as u8;
    }
    fn read_le(buf: &[u8]) -> Self {
        buf[0] != 0
    }
}

/// JSON-serializable description of one field, stored in stream
/// configuration records so readers can reconstruct the writer's layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldSpec {
    Value {
        name: String,
        value_type: FieldType,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        required: bool,
    },
    Array {
        name: String,
        value_type: FieldType,
        count: usize,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        required: bool,
    },
    String {
        name: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        required: bool,
    },
    Vector {
        name: String,
        value_type: FieldType,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        required: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutDescriptor {
    pub fields: Vec<FieldSpec>,
}

impl LayoutDescriptor {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|_| Error::InvalidData("malformed layout descriptor"))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FieldKind {
    Value(FieldType),
    Array(FieldType, usize),
    Str,
    Vector(FieldType),
}

impl FieldKind {
    fn is_var(&self) -> bool {
        matches!(self, FieldKind::Str | FieldKind::Vector(_))
    }

    fn fixed_size(&self) -> usize {
        match self {
            FieldKind::Value(ft) => ft.size(),
            FieldKind::Array(ft, count) => ft.size() * count,
            FieldKind::Str | FieldKind::Vector(_) => 0,
        }
    }
}

#[derive(Debug, Clone)]
struct Field {
    name: String,
    kind: FieldKind,
    // Byte offset in the fixed region, or slot index for var-size fields.
    offset: usize,
    required: bool,
    available: bool,
}

/// Structured record payload with schema-evolution support.
///
/// Wire format: a packed fixed-size region (values and arrays, little
/// endian, declaration order), then one `(u32 offset, u32 length)` index
/// entry per var-size field, then the var-size payloads. Field names carry
/// their nesting path joined by `/`.
///
/// `map_from` matches fields of another layout by full name and exact type,
/// so readers built against a newer or older schema still pick up every
/// field both sides agree on; the rest read as defaults and report as
/// unavailable.
#[derive(Debug, Clone)]
pub struct SchemaLayout {
    fields: Vec<Field>,
    values: Vec<u8>,
    var_values: Vec<Vec<u8>>,
}

const VAR_INDEX_ENTRY_SIZE: usize = 8;

impl SchemaLayout {
    pub fn builder() -> LayoutBuilder {
        LayoutBuilder::new()
    }

    pub fn from_descriptor(descriptor: &LayoutDescriptor) -> Result<Self> {
        let mut builder = LayoutBuilder::new();
        for spec in &descriptor.fields {
            builder = match spec {
                FieldSpec::Value {
                    name,
                    value_type,
                    required,
                } => builder.raw_field(name, FieldKind::Value(*value_type), *required),
                FieldSpec::Array {
                    name,
                    value_type,
                    count,
                    required,
                } => builder.raw_field(name, FieldKind::Array(*value_type, *count), *required),
                FieldSpec::String { name, required } => {
                    builder.raw_field(name, FieldKind::Str, *required)
                }
                FieldSpec::Vector {
                    name,
                    value_type,
                    required,
                } => builder.raw_field(name, FieldKind::Vector(*value_type), *required),
            };
        }
        Ok(builder.build())
    }

    pub fn descriptor(&self) -> LayoutDescriptor {
        let fields = self
            .fields
            .iter()
            .map(|field| match &field.kind {
                FieldKind::Value(ft) => FieldSpec::Value {
                    name: field.name.clone(),
                    value_type: *ft,
                    required: field.required,
                },
                FieldKind::Array(ft, count) => FieldSpec::Array {
                    name: field.name.clone(),
                    value_type: *ft,
                    count: *count,
                    required: field.required,
                },
                FieldKind::Str => FieldSpec::String {
                    name: field.name.clone(),
                    required: field.required,
                },
                FieldKind::Vector(ft) => FieldSpec::Vector {
                    name: field.name.clone(),
                    value_type: *ft,
                    required: field.required,
                },
            })
            .collect();
        LayoutDescriptor { fields }
    }

    fn var_count(&self) -> usize {
        self.var_values.len()
    }

    /// Size of the fixed region plus the var index.
    pub fn fixed_size(&self) -> usize {
        self.values.len() + self.var_count() * VAR_INDEX_ENTRY_SIZE
    }

    fn find(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|field| field.name == name)
            .ok_or_else(|| Error::NotFound(format!("layout field '{name}'")))
    }

    pub fn set<T: LayoutValue>(&mut self, name: &str, value: T) -> Result<()> {
        let idx = self.find(name)?;
        let field = &self.fields[idx];
        if field.kind != FieldKind::Value(T::FIELD_TYPE) {
            return Err(Error::InvalidData("layout field type mismatch"));
        }
        let offset = field.offset;
        value.write_le(&mut self.values[offset..offset + T::SIZE]);
        self.fields[idx].available = true;
        Ok(())
    }

    /// Reads a value field; an unavailable field reads as its zero default.
    pub fn get<T: LayoutValue>(&self, name: &str) -> Result<T> {
        let field = &self.fields[self.find(name)?];
        if field.kind != FieldKind::Value(T::FIELD_TYPE) {
            return Err(Error::InvalidData("layout field type mismatch"));
        }
        Ok(T::read_le(&self.values[field.offset..field.offset + T::SIZE]))
    }

    pub fn set_array<T: LayoutValue>(&mut self, name: &str, values: &[T]) -> Result<()> {
        let idx = self.find(name)?;
        let field = &self.fields[idx];
        match field.kind {
            FieldKind::Array(ft, count) if ft == T::FIELD_TYPE => {
                if values.len() != count {
                    return Err(Error::InvalidData("layout array length mismatch"));
                }
            }
            _ => return Err(Error::InvalidData("layout field type mismatch")),
        }
        let mut offset = field.offset;
        for value in values {
            value.write_le(&mut self.values[offset..offset + T::SIZE]);
            offset += T::SIZE;
        }
        self.fields[idx].available = true;
        Ok(())
    }

    pub fn get_array<T: LayoutValue>(&self, name: &str) -> Result<Vec<T>> {
        let field = &self.fields[self.find(name)?];
        let count = match field.kind {
            FieldKind::Array(ft, count) if ft == T::FIELD_TYPE => count,
            _ => return Err(Error::InvalidData("layout field type mismatch")),
        };
        let mut out = Vec::with_capacity(count);
        let mut offset = field.offset;
        for _ in 0..count {
            out.push(T::read_le(&self.values[offset..offset + T::SIZE]));
            offset += T::SIZE;
        }
        Ok(out)
    }

    pub fn set_string(&mut self, name: &str, value: &str) -> Result<()> {
        let idx = self.find(name)?;
        if self.fields[idx].kind != FieldKind::Str {
            return Err(Error::InvalidData("layout field type mismatch"));
        }
        let slot = self.fields[idx].offset;
        self.var_values[slot] = value.as_bytes().to_vec();
        self.fields[idx].available = true;
        Ok(())
    }

    pub fn get_string(&self, name: &str) -> Result<String> {
        let field = &self.fields[self.find(name)?];
        if field.kind != FieldKind::Str {
            return Err(Error::InvalidData("layout field type mismatch"));
        }
        String::from_utf8(self.var_values[field.offset].clone())
            .map_err(|_| Error::InvalidData("layout string is not valid utf-8"))
    }

    pub fn set_vector<T: LayoutValue>(&mut self, name: &str, values: &[T]) -> Result<()> {
        let idx = self.find(name)?;
        if self.fields[idx].kind != FieldKind::Vector(T::FIELD_TYPE) {
            return Err(Error::InvalidData("layout field type mismatch"));
        }
        let mut payload = vec![0u8; values.len() * T::SIZE];
        for (value, slice) in values.iter().zip(payload.chunks_exact_mut(T::SIZE)) {
            value.write_le(slice);
        }
        let slot = self.fields[idx].offset;
        self.var_values[slot] = payload;
        self.fields[idx].available = true;
        Ok(())
    }

    pub fn get_vector<T: LayoutValue>(&self, name: &str) -> Result<Vec<T>> {
        let field = &self.fields[self.find(name)?];
        if field.kind != FieldKind::Vector(T::FIELD_TYPE) {
            return Err(Error::InvalidData("layout field type mismatch"));
        }
        let payload = &self.var_values[field.offset];
        if payload.len() % T::SIZE != 0 {
            return Err(Error::InvalidData("layout vector size mismatch"));
        }
        Ok(payload.chunks_exact(T::SIZE).map(T::read_le).collect())
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.find(name)
            .map(|idx| self.fields[idx].available)
            .unwrap_or(false)
    }

    pub fn has_all_required_fields(&self) -> bool {
        self.fields
            .iter()
            .all(|field| !field.required || field.available)
    }

    /// Encodes the layout's current values into the wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let var_total: usize = self.var_values.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(self.fixed_size() + var_total);
        out.extend_from_slice(&self.values);
        let mut offset = 0u32;
        for payload in &self.var_values {
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            offset += payload.len() as u32;
        }
        for payload in &self.var_values {
            out.extend_from_slice(payload);
        }
        out
    }

    /// Decodes `data`, produced by a layout with the same field list, into
    /// this layout's values. Every field becomes available.
    pub fn read_from(&mut self, data: &[u8]) -> Result<()> {
        let fixed_size = self.fixed_size();
        if data.len() < fixed_size {
            return Err(Error::NotEnoughData {
                requested: fixed_size,
                got: data.len(),
            });
        }
        let fixed_len = self.values.len();
        self.values.copy_from_slice(&data[..fixed_len]);
        let index = &data[fixed_len..fixed_size];
        let var_region = &data[fixed_size..];
        for slot in 0..self.var_count() {
            let entry = &index[slot * VAR_INDEX_ENTRY_SIZE..(slot + 1) * VAR_INDEX_ENTRY_SIZE];
            let offset = u32::from_le_bytes(entry[0..4].try_into().expect("slice length")) as usize;
            let length = u32::from_le_bytes(entry[4..8].try_into().expect("slice length")) as usize;
            let end = offset
                .checked_add(length)
                .ok_or(Error::InvalidData("layout var index overflow"))?;
            if end > var_region.len() {
                return Err(Error::InvalidData("layout var field out of bounds"));
            }
            self.var_values[slot] = var_region[offset..end].to_vec();
        }
        for field in &mut self.fields {
            field.available = true;
        }
        Ok(())
    }

    /// Copies every field that `source` also declares, matching by full
    /// name and exact type. Unmatched fields reset to defaults and report
    /// unavailable.
    pub fn map_from(&mut self, source: &SchemaLayout) {
        for idx in 0..self.fields.len() {
            let matched = source.fields.iter().find(|candidate| {
                candidate.name == self.fields[idx].name
                    && candidate.kind == self.fields[idx].kind
                    && candidate.available
            });
            match matched {
                Some(src_field) => {
                    let size = self.fields[idx].kind.fixed_size();
                    if self.fields[idx].kind.is_var() {
                        self.var_values[self.fields[idx].offset] =
                            source.var_values[src_field.offset].clone();
                    } else {
                        let dst = self.fields[idx].offset;
                        let src = src_field.offset;
                        self.values[dst..dst + size]
                            .copy_from_slice(&source.values[src..src + size]);
                    }
                    self.fields[idx].available = true;
                }
                None => {
                    let size = self.fields[idx].kind.fixed_size();
                    if self.fields[idx].kind.is_var() {
                        self.var_values[self.fields[idx].offset].clear();
                    } else {
                        let dst = self.fields[idx].offset;
                        self.values[dst..dst + size].fill(0);
                    }
                    self.fields[idx].available = false;
                }
            }
        }
    }
}

/// Declaration-order layout builder with `/`-joined nesting.
pub struct LayoutBuilder {
    fields: Vec<(String, FieldKind, bool)>,
    prefix: Vec<String>,
}

impl LayoutBuilder {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            prefix: Vec::new(),
        }
    }

    fn full_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.prefix.join("/"))
        }
    }

    fn raw_field(mut self, full_name: &str, kind: FieldKind, required: bool) -> Self {
        self.fields.push((full_name.to_string(), kind, required));
        self
    }

    pub fn value<T: LayoutValue>(self, name: &str) -> Self {
        let full = self.full_name(name);
        self.raw_field(&full, FieldKind::Value(T::FIELD_TYPE), false)
    }

    pub fn array<T: LayoutValue>(self, name: &str, count: usize) -> Self {
        let full = self.full_name(name);
        self.raw_field(&full, FieldKind::Array(T::FIELD_TYPE, count), false)
    }

    pub fn string(self, name: &str) -> Self {
        let full = self.full_name(name);
        self.raw_field(&full, FieldKind::Str, false)
    }

    pub fn vector<T: LayoutValue>(self, name: &str) -> Self {
        let full = self.full_name(name);
        self.raw_field(&full, FieldKind::Vector(T::FIELD_TYPE), false)
    }

    /// Marks the most recently declared field as required.
    pub fn required(mut self) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.2 = true;
        }
        self
    }

    pub fn begin_struct(mut self, name: &str) -> Self {
        self.prefix.push(name.to_string());
        self
    }

    pub fn end_struct(mut self) -> Self {
        self.prefix.pop();
        self
    }

    pub fn build(self) -> SchemaLayout {
        let mut fields = Vec::with_capacity(self.fields.len());
        let mut fixed_offset = 0;
        let mut var_slot = 0;
        for (name, kind, required) in self.fields {
            let offset = if kind.is_var() {
                let slot = var_slot;
                var_slot += 1;
                slot
            } else {
                let offset = fixed_offset;
                fixed_offset += kind.fixed_size();
                offset
            };
            fields.push(Field {
                name,
                kind,
                offset,
                required,
                available: true,
            });
        }
        SchemaLayout {
            fields,
            values: vec![0u8; fixed_offset],
            var_values: vec![Vec::new(); var_slot],
        }
    }
}

impl Default for LayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor_layout() -> SchemaLayout {
        SchemaLayout::builder()
            .value::<f64>("timestamp")
            .required()
            .value::<u32>("frame_counter")
            .begin_struct("calibration")
            .array::<f32>("matrix", 4)
            .value::<bool>("valid")
            .end_struct()
            .string("device_name")
            .vector::<u16>("samples")
            .build()
    }

    #[test]
    fn wire_round_trip() {
        let mut layout = sensor_layout();
        layout.set("timestamp", 12.25f64).expect("set");
        layout.set("frame_counter", 42u32).expect("set");
        layout
            .set_array("calibration/matrix", &[1.0f32, 0.0, 0.0, 1.0])
            .expect("set");
        layout.set("calibration/valid", true).expect("set");
        layout.set_string("device_name", "imu-left").expect("set");
        layout.set_vector("samples", &[7u16, 8, 9]).expect("set");

        let data = layout.serialize();
        let mut restored = sensor_layout();
        restored.read_from(&data).expect("read");
        assert_eq!(restored.get::<f64>("timestamp").expect("get"), 12.25);
        assert_eq!(restored.get::<u32>("frame_counter").expect("get"), 42);
        assert_eq!(
            restored.get_array::<f32>("calibration/matrix").expect("get"),
            vec![1.0, 0.0, 0.0, 1.0]
        );
        assert!(restored.get::<bool>("calibration/valid").expect("get"));
        assert_eq!(restored.get_string("device_name").expect("get"), "imu-left");
        assert_eq!(restored.get_vector::<u16>("samples").expect("get"), vec![7, 8, 9]);
    }

    #[test]
    fn mapping_matches_by_name_and_type() {
        let mut source = sensor_layout();
        source.set("timestamp", 5.0f64).expect("set");
        source.set("frame_counter", 3u32).expect("set");
        source.set_string("device_name", "cam0").expect("set");

        // A reader schema that renamed one field, retyped another, and
        // added a new one.
        let mut dest = SchemaLayout::builder()
            .value::<f64>("timestamp")
            .required()
            .value::<u64>("frame_counter")
            .string("device_name")
            .value::<f32>("exposure")
            .build();
        dest.map_from(&source);

        assert!(dest.is_available("timestamp"));
        assert_eq!(dest.get::<f64>("timestamp").expect("get"), 5.0);
        assert_eq!(dest.get_string("device_name").expect("get"), "cam0");
        // u32 on the wire does not match a u64 reader field.
        assert!(!dest.is_available("frame_counter"));
        assert_eq!(dest.get::<u64>("frame_counter").expect("get"), 0);
        assert!(!dest.is_available("exposure"));
        assert!(dest.has_all_required_fields());
    }

    #[test]
    fn missing_required_field_is_reported() {
        let source = SchemaLayout::builder().value::<u32>("other").build();
        let mut dest = SchemaLayout::builder()
            .value::<f64>("timestamp")
            .required()
            .build();
        dest.map_from(&source);
        assert!(!dest.has_all_required_fields());
    }

    #[test]
    fn descriptor_json_round_trip() {
        let layout = sensor_layout();
        let descriptor = layout.descriptor();
        let json = descriptor.to_json();
        let parsed = LayoutDescriptor::from_json(&json).expect("parse");
        assert_eq!(parsed, descriptor);
        let rebuilt = SchemaLayout::from_descriptor(&parsed).expect("rebuild");
        assert_eq!(rebuilt.descriptor(), descriptor);
    }
}
