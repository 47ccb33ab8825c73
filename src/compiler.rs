// Schema compiler: generic protodef schema tree to a FieldType graph
// Aliases are expanded textually, so every compiled node has exactly one parent

use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use tracing::trace;

use crate::error::{SchemaError, SchemaResult};
use crate::field::{
    entry_mask, BitEntry, Bitfield, BufferLength, CountSource, FieldKind, FieldType, NamedField,
    ANON_FIELD,
};
use crate::registry::{FallbackCategory, Registry};

const MAX_NESTING: usize = 128;

/// Named types visible to a compile, searched innermost layer first.
#[derive(Debug, Clone, Default)]
pub struct TypeDictionary<'a> {
    layers: Vec<&'a Map<String, JsonValue>>,
}

impl<'a> TypeDictionary<'a> {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Returns a dictionary that consults `types` before the existing layers.
    pub fn with_layer(&self, types: &'a Map<String, JsonValue>) -> Self {
        let mut layers = Vec::with_capacity(self.layers.len() + 1);
        layers.push(types);
        layers.extend(self.layers.iter().copied());
        Self { layers }
    }

    pub fn get(&self, name: &str) -> Option<&'a JsonValue> {
        self.layers.iter().find_map(|layer| layer.get(name))
    }
}

/// Composite tags a schema array node can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Construct {
    Container,
    Option,
    Buffer,
    Mapper,
    Array,
    Bitfield,
    // Recognised but not decodable yet.
    EntityMetadataLoop,
    TopBitSetTerminatedArray,
    Switch,
}

impl Construct {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "container" => Some(Construct::Container),
            "option" => Some(Construct::Option),
            "buffer" => Some(Construct::Buffer),
            "mapper" => Some(Construct::Mapper),
            "array" => Some(Construct::Array),
            "bitfield" => Some(Construct::Bitfield),
            "entityMetadataLoop" => Some(Construct::EntityMetadataLoop),
            "topBitSetTerminatedArray" => Some(Construct::TopBitSetTerminatedArray),
            "switch" => Some(Construct::Switch),
            _ => None,
        }
    }
}

/// Compiles `node` against `types` and `registry`.
pub fn compile(
    node: &JsonValue,
    types: &TypeDictionary<'_>,
    registry: &Registry,
    top_level: bool,
) -> SchemaResult<FieldType> {
    SchemaCompiler::new(registry, types.clone()).compile(node, top_level)
}

pub struct SchemaCompiler<'a> {
    registry: &'a Registry,
    types: TypeDictionary<'a>,
    expanding: Vec<String>,
    nesting: usize,
}

impl<'a> SchemaCompiler<'a> {
    pub fn new(registry: &'a Registry, types: TypeDictionary<'a>) -> Self {
        Self {
            registry,
            types,
            expanding: Vec::new(),
            nesting: 0,
        }
    }

    pub fn compile(&mut self, node: &JsonValue, top_level: bool) -> SchemaResult<FieldType> {
        if self.nesting >= MAX_NESTING {
            return Err(SchemaError::MalformedNode(format!(
                "nesting deeper than {} levels",
                MAX_NESTING
            )));
        }
        self.nesting += 1;
        let result = match node {
            JsonValue::String(name) => self.compile_named(name, top_level),
            JsonValue::Array(items) => self.compile_composite(items, top_level),
            other => Err(SchemaError::MalformedNode(format!(
                "expected type name or [tag, params], got {}",
                other
            ))),
        };
        self.nesting -= 1;
        result
    }

    fn compile_named(&mut self, name: &str, top_level: bool) -> SchemaResult<FieldType> {
        if let Some(kind) = self.registry.primitive(name) {
            let handle = self.registry.fallback(kind.fallback_category());
            return Ok(FieldType::new(FieldKind::Primitive(kind)).with_handle(handle));
        }

        let alias = match self.types.get(name) {
            Some(JsonValue::String(s)) if s == "native" => {
                return Err(SchemaError::UnsupportedConstruct {
                    tag: name.to_string(),
                })
            }
            Some(alias) => alias,
            None => return Err(SchemaError::UnknownType(name.to_string())),
        };
        if self.expanding.iter().any(|n| n == name) {
            return Err(SchemaError::RecursiveAlias {
                name: name.to_string(),
            });
        }

        trace!(alias = name, "expanding type alias");
        self.expanding.push(name.to_string());
        let result = self.compile(alias, top_level);
        self.expanding.pop();
        result
    }

    fn compile_composite(&mut self, items: &[JsonValue], top_level: bool) -> SchemaResult<FieldType> {
        let [tag, params] = items else {
            return Err(SchemaError::MalformedNode(format!(
                "composite node must have 2 elements, got {}",
                items.len()
            )));
        };
        let tag = tag
            .as_str()
            .ok_or_else(|| SchemaError::MalformedNode("composite tag must be a string".to_string()))?;

        match Construct::from_tag(tag) {
            Some(Construct::Container) => self.compile_container(params, top_level),
            Some(Construct::Option) => {
                let inner = self.compile(params, false)?;
                Ok(FieldType::new(FieldKind::Option(Box::new(inner))))
            }
            Some(Construct::Buffer) => self.compile_buffer(params),
            Some(Construct::Mapper) => self.compile_mapper(params),
            Some(Construct::Array) => self.compile_array(params),
            Some(Construct::Bitfield) => self.compile_bitfield(params),
            Some(
                Construct::EntityMetadataLoop | Construct::TopBitSetTerminatedArray | Construct::Switch,
            ) => Err(SchemaError::NotYetImplemented {
                tag: tag.to_string(),
            }),
            None => Err(SchemaError::UnsupportedConstruct {
                tag: tag.to_string(),
            }),
        }
    }

    fn compile_container(&mut self, params: &JsonValue, top_level: bool) -> SchemaResult<FieldType> {
        let members = params.as_array().ok_or_else(|| {
            SchemaError::MalformedNode("container parameters must be an array".to_string())
        })?;

        let mut fields = Vec::with_capacity(members.len());
        let mut resolved = false;
        for member in members {
            let type_node = member.get("type").ok_or(SchemaError::MissingParam {
                construct: "container",
                param: "type",
            })?;
            let mut field = self.compile(type_node, false)?;
            let name = match member.get("name").and_then(JsonValue::as_str) {
                Some(name) => {
                    if let Some(handle) = self.registry.handle_for_name(name) {
                        field.resolve(handle);
                        resolved = true;
                    }
                    name.to_string()
                }
                None => ANON_FIELD.to_string(),
            };
            fields.push(NamedField { name, field });
        }

        let mut container = FieldType::new(FieldKind::Container { fields, top_level });
        container.resolved = resolved;
        Ok(container)
    }

    fn compile_buffer(&mut self, params: &JsonValue) -> SchemaResult<FieldType> {
        let length = match params.get("count") {
            Some(count) => {
                let count = count.as_u64().ok_or_else(|| {
                    SchemaError::MalformedNode("buffer count must be a non-negative number".to_string())
                })?;
                BufferLength::Fixed(count as usize)
            }
            None => BufferLength::Prefixed,
        };
        let handle = self
            .registry
            .handle_for_name("bytes")
            .or_else(|| self.registry.fallback(FallbackCategory::Bytes));
        Ok(FieldType::new(FieldKind::Buffer(length)).with_handle(handle))
    }

    fn compile_mapper(&mut self, params: &JsonValue) -> SchemaResult<FieldType> {
        let type_node = params.get("type").ok_or(SchemaError::MissingParam {
            construct: "mapper",
            param: "type",
        })?;
        let inner = self.compile(type_node, false)?;
        let mappings = parse_mappings(params.get("mappings").ok_or(SchemaError::MissingParam {
            construct: "mapper",
            param: "mappings",
        })?)?;
        let handle = self.registry.fallback(FallbackCategory::String);
        Ok(FieldType::new(FieldKind::Mapper {
            inner: Box::new(inner),
            mappings,
        })
        .with_handle(handle))
    }

    fn compile_array(&mut self, params: &JsonValue) -> SchemaResult<FieldType> {
        let count = match (params.get("count"), params.get("countType")) {
            (Some(JsonValue::Number(n)), _) => {
                let n = n.as_u64().ok_or_else(|| {
                    SchemaError::MalformedNode("array count must be a non-negative integer".to_string())
                })?;
                CountSource::Fixed(n as usize)
            }
            (Some(JsonValue::String(path)), _) => field_reference(path),
            (Some(other), _) => {
                return Err(SchemaError::MalformedNode(format!(
                    "array count must be a number or field name, got {}",
                    other
                )))
            }
            (None, Some(JsonValue::String(count_type))) => {
                if count_type == "varint" {
                    CountSource::VarInt
                } else {
                    match self.registry.primitive(count_type) {
                        Some(kind) if kind.is_integer() => CountSource::Inline(kind),
                        _ => field_reference(count_type),
                    }
                }
            }
            (None, _) => {
                return Err(SchemaError::MissingParam {
                    construct: "array",
                    param: "countType",
                })
            }
        };
        let type_node = params.get("type").ok_or(SchemaError::MissingParam {
            construct: "array",
            param: "type",
        })?;
        let element = self.compile(type_node, false)?;
        Ok(FieldType::new(FieldKind::Array {
            element: Box::new(element),
            count,
        }))
    }

    fn compile_bitfield(&mut self, params: &JsonValue) -> SchemaResult<FieldType> {
        let raw_entries = params.as_array().ok_or_else(|| {
            SchemaError::MalformedNode("bitfield parameters must be an array".to_string())
        })?;

        let mut layout = Vec::with_capacity(raw_entries.len());
        let mut signature = String::new();
        let mut total_bits: u32 = 0;
        for raw in raw_entries {
            let name = raw.get("name").and_then(JsonValue::as_str).ok_or(
                SchemaError::MissingParam {
                    construct: "bitfield",
                    param: "name",
                },
            )?;
            let bits = raw.get("size").and_then(JsonValue::as_u64).ok_or(
                SchemaError::MissingParam {
                    construct: "bitfield",
                    param: "size",
                },
            )?;
            if bits == 0 || bits > 64 {
                return Err(SchemaError::MalformedNode(format!(
                    "bitfield entry '{}' has size {}",
                    name, bits
                )));
            }
            let signed = raw.get("signed").map(truthy).unwrap_or(false);
            signature.push_str(&format!("[{}]{}", bits, name));
            total_bits = total_bits.saturating_add(bits as u32);
            layout.push((name.to_string(), bits as u32, signed));
        }
        if total_bits > 64 {
            return Err(SchemaError::BitfieldTooWide { bits: total_bits });
        }

        let handles = self
            .registry
            .bitfield(&signature)
            .ok_or_else(|| SchemaError::UnregisteredBitfield {
                signature: signature.clone(),
            })?;
        if handles.entries.len() != layout.len() {
            return Err(SchemaError::MalformedNode(format!(
                "bitfield '{}' registers {} entry handles for {} entries",
                signature,
                handles.entries.len(),
                layout.len()
            )));
        }

        let mut offset = 0;
        let entries = layout
            .into_iter()
            .zip(&handles.entries)
            .map(|((name, bits, signed), handle)| {
                let mask = entry_mask(offset, bits, total_bits);
                offset += bits;
                BitEntry {
                    name,
                    bits,
                    signed,
                    mask,
                    handle: Some(*handle),
                }
            })
            .collect();

        let mut field = FieldType::new(FieldKind::Bitfield(Bitfield {
            entries,
            total_bits,
            signature,
        }));
        field.handle = Some(handles.whole);
        field.resolved = true;
        Ok(field)
    }
}

/// Parses a mapping key: `0x`-prefixed hex or plain decimal.
pub fn parse_key(key: &str) -> Option<i64> {
    let key = key.trim();
    match key.strip_prefix("0x").or_else(|| key.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => key.parse().ok(),
    }
}

fn parse_mappings(node: &JsonValue) -> SchemaResult<HashMap<i64, String>> {
    let object = node
        .as_object()
        .ok_or_else(|| SchemaError::MalformedMapping("mappings must be an object".to_string()))?;
    object
        .iter()
        .map(|(key, value)| {
            let id = parse_key(key)
                .ok_or_else(|| SchemaError::MalformedMapping(format!("key '{}' is not an integer", key)))?;
            let name = value.as_str().ok_or_else(|| {
                SchemaError::MalformedMapping(format!("value for key '{}' is not a string", key))
            })?;
            Ok((id, name.to_string()))
        })
        .collect()
}

/// `../../name` refers to `name` two scopes further out than a sibling.
fn field_reference(path: &str) -> CountSource {
    let mut depth = 1;
    let mut rest = path;
    while let Some(stripped) = rest.strip_prefix("../") {
        depth += 1;
        rest = stripped;
    }
    CountSource::Field {
        depth,
        path: rest.to_string(),
    }
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BitfieldHandles, DisplayHandle, Edition, PrimitiveKind};
    use serde_json::json;

    fn registry() -> Registry {
        let mut registry = Registry::new(Edition::Java);
        registry.register_fallback(FallbackCategory::Uint, DisplayHandle::new(100));
        registry.register_name("entityId", DisplayHandle::new(1));
        registry
    }

    fn compile_with(node: JsonValue, types: JsonValue, registry: &Registry) -> SchemaResult<FieldType> {
        let types = types.as_object().cloned().unwrap_or_default();
        let dict = TypeDictionary::new().with_layer(&types);
        compile(&node, &dict, registry, true)
    }

    #[test]
    fn test_primitive_gets_fallback_handle() {
        let field = compile_with(json!("varint"), json!({}), &registry()).unwrap();
        assert_eq!(field.kind, FieldKind::Primitive(PrimitiveKind::VarInt));
        assert_eq!(field.handle, Some(DisplayHandle::new(100)));
        assert!(!field.resolved);
    }

    #[test]
    fn test_alias_is_expanded() {
        let types = json!({ "slot": ["option", "varint"] });
        let field = compile_with(json!("slot"), types, &registry()).unwrap();
        assert!(matches!(field.kind, FieldKind::Option(_)));
    }

    #[test]
    fn test_self_referential_alias_fails() {
        let types = json!({ "loop": ["option", "loop"] });
        let err = compile_with(json!("loop"), types, &registry()).unwrap_err();
        assert_eq!(err, SchemaError::RecursiveAlias { name: "loop".to_string() });
    }

    #[test]
    fn test_unknown_type_fails() {
        let err = compile_with(json!("mystery"), json!({}), &registry()).unwrap_err();
        assert_eq!(err, SchemaError::UnknownType("mystery".to_string()));
    }

    #[test]
    fn test_native_without_builtin_is_unsupported() {
        let types = json!({ "entityMetadata": "native" });
        let err = compile_with(json!("entityMetadata"), types, &registry()).unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedConstruct { .. }));
    }

    #[test]
    fn test_container_resolves_named_members() {
        let node = json!(["container", [
            { "name": "entityId", "type": "varint" },
            { "name": "other", "type": "u8" },
            { "type": "bool" }
        ]]);
        let field = compile_with(node, json!({}), &registry()).unwrap();
        assert!(field.resolved);
        let FieldKind::Container { fields, top_level } = &field.kind else {
            panic!("expected container");
        };
        assert!(*top_level);
        assert_eq!(fields[0].name, "entityId");
        assert_eq!(fields[0].field.handle, Some(DisplayHandle::new(1)));
        assert!(fields[0].field.resolved);
        assert!(!fields[1].field.resolved);
        assert_eq!(fields[2].name, ANON_FIELD);
    }

    #[test]
    fn test_nested_container_is_not_top_level() {
        let node = json!(["container", [
            { "name": "inner", "type": ["container", [{ "name": "a", "type": "u8" }]] }
        ]]);
        let field = compile_with(node, json!({}), &registry()).unwrap();
        let FieldKind::Container { fields, .. } = &field.kind else {
            panic!("expected container");
        };
        assert!(matches!(
            fields[0].field.kind,
            FieldKind::Container { top_level: false, .. }
        ));
    }

    #[test]
    fn test_named_option_passes_handle_to_inner() {
        let node = json!(["container", [{ "name": "entityId", "type": ["option", "varint"] }]]);
        let field = compile_with(node, json!({}), &registry()).unwrap();
        let FieldKind::Container { fields, .. } = &field.kind else {
            panic!("expected container");
        };
        let FieldKind::Option(inner) = &fields[0].field.kind else {
            panic!("expected option");
        };
        assert_eq!(inner.handle, Some(DisplayHandle::new(1)));
    }

    #[test]
    fn test_buffer_variants() {
        let fixed = compile_with(json!(["buffer", { "count": 16 }]), json!({}), &registry()).unwrap();
        assert_eq!(fixed.kind, FieldKind::Buffer(BufferLength::Fixed(16)));
        let prefixed =
            compile_with(json!(["buffer", { "countType": "varint" }]), json!({}), &registry()).unwrap();
        assert_eq!(prefixed.kind, FieldKind::Buffer(BufferLength::Prefixed));
    }

    #[test]
    fn test_mapper_keys() {
        let node = json!(["mapper", { "type": "varint", "mappings": { "0x00": "a", "17": "b" } }]);
        let field = compile_with(node, json!({}), &registry()).unwrap();
        let FieldKind::Mapper { mappings, .. } = &field.kind else {
            panic!("expected mapper");
        };
        assert_eq!(mappings.get(&0).map(String::as_str), Some("a"));
        assert_eq!(mappings.get(&17).map(String::as_str), Some("b"));
    }

    #[test]
    fn test_mapper_bad_key_fails() {
        let node = json!(["mapper", { "type": "varint", "mappings": { "zero": "a" } }]);
        let err = compile_with(node, json!({}), &registry()).unwrap_err();
        assert!(matches!(err, SchemaError::MalformedMapping(_)));
    }

    #[test]
    fn test_array_count_sources() {
        let reg = registry();
        let by_varint = compile_with(
            json!(["array", { "countType": "varint", "type": "u8" }]),
            json!({}),
            &reg,
        )
        .unwrap();
        assert!(matches!(by_varint.kind, FieldKind::Array { count: CountSource::VarInt, .. }));

        let inline = compile_with(
            json!(["array", { "countType": "i16", "type": "u8" }]),
            json!({}),
            &reg,
        )
        .unwrap();
        assert!(matches!(
            inline.kind,
            FieldKind::Array { count: CountSource::Inline(PrimitiveKind::I16), .. }
        ));

        let sibling = compile_with(
            json!(["array", { "countType": "count", "type": "u8" }]),
            json!({}),
            &reg,
        )
        .unwrap();
        let FieldKind::Array { count, .. } = sibling.kind else {
            panic!("expected array");
        };
        assert_eq!(count, CountSource::Field { depth: 1, path: "count".to_string() });

        let outer = compile_with(
            json!(["array", { "count": "../total", "type": "u8" }]),
            json!({}),
            &reg,
        )
        .unwrap();
        let FieldKind::Array { count, .. } = outer.kind else {
            panic!("expected array");
        };
        assert_eq!(count, CountSource::Field { depth: 2, path: "total".to_string() });

        let fixed = compile_with(json!(["array", { "count": 3, "type": "u8" }]), json!({}), &reg).unwrap();
        assert!(matches!(fixed.kind, FieldKind::Array { count: CountSource::Fixed(3), .. }));
    }

    #[test]
    fn test_bitfield_requires_registration() {
        let node = json!(["bitfield", [
            { "name": "a", "size": 4, "signed": false },
            { "name": "b", "size": 4, "signed": true }
        ]]);
        let err = compile_with(node.clone(), json!({}), &registry()).unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnregisteredBitfield { signature: "[4]a[4]b".to_string() }
        );

        let mut reg = registry();
        reg.register_bitfield(
            "[4]a[4]b",
            BitfieldHandles {
                whole: DisplayHandle::new(50),
                entries: vec![DisplayHandle::new(51), DisplayHandle::new(52)],
            },
        );
        let field = compile_with(node, json!({}), &reg).unwrap();
        assert!(field.resolved);
        assert_eq!(field.handle, Some(DisplayHandle::new(50)));
        let FieldKind::Bitfield(bitfield) = &field.kind else {
            panic!("expected bitfield");
        };
        assert_eq!(bitfield.total_bits, 8);
        assert_eq!(bitfield.entries[0].mask, 0xF0);
        assert!(bitfield.entries[1].signed);
    }

    #[test]
    fn test_bitfield_too_wide() {
        let node = json!(["bitfield", [
            { "name": "a", "size": 40, "signed": false },
            { "name": "b", "size": 40, "signed": false }
        ]]);
        let err = compile_with(node, json!({}), &registry()).unwrap_err();
        assert_eq!(err, SchemaError::BitfieldTooWide { bits: 80 });
    }

    #[test]
    fn test_unimplemented_constructs() {
        for tag in ["switch", "entityMetadataLoop", "topBitSetTerminatedArray"] {
            let err = compile_with(json!([tag, {}]), json!({}), &registry()).unwrap_err();
            assert_eq!(err, SchemaError::NotYetImplemented { tag: tag.to_string() });
        }
        let err = compile_with(json!(["pstring", {}]), json!({}), &registry()).unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedConstruct { .. }));
    }

    #[test]
    fn test_failure_inside_container_fails_whole_field() {
        let node = json!(["container", [
            { "name": "ok", "type": "u8" },
            { "name": "bad", "type": ["switch", {}] }
        ]]);
        assert!(compile_with(node, json!({}), &registry()).is_err());
    }

    #[test]
    fn test_local_types_shadow_global() {
        let global = json!({ "thing": "u8" }).as_object().cloned().unwrap();
        let local = json!({ "thing": "varint" }).as_object().cloned().unwrap();
        let dict = TypeDictionary::new().with_layer(&global).with_layer(&local);
        let field = compile(&json!("thing"), &dict, &registry(), false).unwrap();
        assert_eq!(field.kind, FieldKind::Primitive(PrimitiveKind::VarInt));
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("0x1f"), Some(31));
        assert_eq!(parse_key("42"), Some(42));
        assert_eq!(parse_key("-1"), Some(-1));
        assert_eq!(parse_key("x"), None);
    }
}
