// Protocol set for one protocol edition
// Compiles every packet schema of a protodef document once, then serves
// packet lookups and decodes from the compiled, read-only result

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value as JsonValue};
use serde_yaml::Value as YamlValue;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::compiler::{compile, parse_key, TypeDictionary};
use crate::decoder::{decode_message, LengthMismatch};
use crate::display::DisplaySink;
use crate::error::{DecodeError, SchemaError, SchemaResult};
use crate::field::FieldType;
use crate::nbt::NbtRoot;
use crate::packet_logger::PacketDirection;
use crate::reader::ByteReader;
use crate::recorder::Record;
use crate::registry::{Edition, Registry};

/// Display name for a packet whose entry could not be found.
pub const UNKNOWN_PACKET: &str = "Unknown";

/// State to build `document` with: `None` for a document that keeps its
/// `toClient`/`toServer` sections at the top level, `wanted` otherwise.
pub fn state_for<'a>(document: &JsonValue, wanted: &'a str) -> Option<&'a str> {
    if document.get("toClient").is_some() || document.get("toServer").is_some() {
        None
    } else {
        Some(wanted)
    }
}

#[derive(Debug, Clone)]
pub struct ProtocolEntry {
    pub id: u32,
    pub name: String,
    root: Option<FieldType>,
    error: Option<SchemaError>,
}

impl ProtocolEntry {
    /// Compiled root field, `None` when the packet's schema is unsupported.
    pub fn root(&self) -> Option<&FieldType> {
        self.root.as_ref()
    }

    pub fn is_supported(&self) -> bool {
        self.root.is_some()
    }

    pub fn compile_error(&self) -> Option<&SchemaError> {
        self.error.as_ref()
    }
}

/// Name of `entry`, or [`UNKNOWN_PACKET`] when there is none.
pub fn name_of(entry: Option<&ProtocolEntry>) -> &str {
    entry.map_or(UNKNOWN_PACKET, |e| e.name.as_str())
}

#[derive(Debug, Default)]
struct PacketTable {
    by_id: HashMap<u32, ProtocolEntry>,
    by_name: HashMap<String, u32>,
}

impl PacketTable {
    fn insert(&mut self, entry: ProtocolEntry) {
        self.by_name.insert(entry.name.clone(), entry.id);
        self.by_id.insert(entry.id, entry);
    }
}

/// One packet decoded by [`ProtocolSet::decode_packet`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    pub id: Option<u32>,
    pub name: String,
    pub record: Record,
    /// Bytes of the packet body consumed, the leading id excluded.
    pub consumed: usize,
    pub mismatch: Option<LengthMismatch>,
    pub error: Option<DecodeError>,
}

impl DecodedPacket {
    fn failed(id: Option<u32>, name: &str, error: DecodeError) -> Self {
        Self {
            id,
            name: name.to_string(),
            record: Record::default(),
            consumed: 0,
            mismatch: None,
            error: Some(error),
        }
    }
}

/// Compiled packets of one edition, both directions.
///
/// Read-only once built, so a single set can be shared between threads
/// and decoded from concurrently.
#[derive(Debug)]
pub struct ProtocolSet {
    edition: Edition,
    state: Option<String>,
    nbt_root: NbtRoot,
    clientbound: PacketTable,
    serverbound: PacketTable,
}

impl ProtocolSet {
    /// Builds the set from a protodef document.
    ///
    /// With a `state`, the `toClient`/`toServer` sections are taken from
    /// that state's object; otherwise they must sit at the top level.
    /// Packets whose schema fails to compile are kept without a root.
    pub fn from_document(
        document: &JsonValue,
        state: Option<&str>,
        registry: &Registry,
    ) -> SchemaResult<Self> {
        let section = match state {
            Some(state) => document.get(state).ok_or_else(|| {
                SchemaError::MalformedNode(format!("protocol has no '{}' state", state))
            })?,
            None => document,
        };

        let empty = Map::new();
        let global = document
            .get("types")
            .and_then(JsonValue::as_object)
            .unwrap_or(&empty);
        let globals = TypeDictionary::new().with_layer(global);

        let mut set = Self {
            edition: registry.edition(),
            state: state.map(str::to_string),
            nbt_root: registry.nbt_root(),
            clientbound: PacketTable::default(),
            serverbound: PacketTable::default(),
        };

        for direction in [PacketDirection::Clientbound, PacketDirection::Serverbound] {
            let key = direction.section_key();
            let Some(local) = section
                .get(key)
                .and_then(|d| d.get("types"))
                .and_then(JsonValue::as_object)
            else {
                debug!(section = key, "protocol has no packets for direction");
                continue;
            };
            let types = globals.with_layer(local);
            let table = set.table_mut(direction);

            for (id, name) in packet_ids(direction, local) {
                let schema_name = format!("packet_{}", name);
                let compiled = match types.get(&schema_name) {
                    Some(node) => compile(node, &types, registry, true),
                    None => Err(SchemaError::UnknownType(schema_name)),
                };
                let entry = match compiled {
                    Ok(root) => {
                        debug!(id, name = %name, ?direction, "compiled packet schema");
                        ProtocolEntry { id, name, root: Some(root), error: None }
                    }
                    Err(err) => {
                        warn!(id, name = %name, ?direction, error = %err, "unsupported packet schema");
                        ProtocolEntry { id, name, root: None, error: Some(err) }
                    }
                };
                table.insert(entry);
            }
        }

        info!(
            edition = %set.edition,
            clientbound = set.clientbound.by_id.len(),
            serverbound = set.serverbound.by_id.len(),
            "protocol set ready"
        );
        Ok(set)
    }

    /// Loads a schema file and builds the set from it.
    pub fn load(path: &Path, state: Option<&str>, registry: &Registry) -> Result<Self> {
        let document = load_document(path)?;
        Self::from_document(&document, state, registry)
            .with_context(|| format!("Failed to build protocol from {}", path.display()))
    }

    fn table(&self, direction: PacketDirection) -> &PacketTable {
        match direction {
            PacketDirection::Clientbound => &self.clientbound,
            PacketDirection::Serverbound => &self.serverbound,
        }
    }

    fn table_mut(&mut self, direction: PacketDirection) -> &mut PacketTable {
        match direction {
            PacketDirection::Clientbound => &mut self.clientbound,
            PacketDirection::Serverbound => &mut self.serverbound,
        }
    }

    pub fn edition(&self) -> Edition {
        self.edition
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn packet_count(&self, direction: PacketDirection) -> usize {
        self.table(direction).by_id.len()
    }

    pub fn entry_by_id(&self, id: u32, direction: PacketDirection) -> Option<&ProtocolEntry> {
        self.table(direction).by_id.get(&id)
    }

    pub fn id_by_name(&self, name: &str, direction: PacketDirection) -> Option<u32> {
        self.table(direction).by_name.get(name).copied()
    }

    /// Entries of one direction ordered by packet id.
    pub fn entries(&self, direction: PacketDirection) -> Vec<&ProtocolEntry> {
        let mut entries: Vec<_> = self.table(direction).by_id.values().collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    /// Decodes one packet: a leading varint packet id followed by the body
    /// described by that packet's schema.
    pub fn decode_packet(
        &self,
        data: &[u8],
        direction: PacketDirection,
        mut sink: Option<&mut dyn DisplaySink>,
    ) -> DecodedPacket {
        let mut reader = ByteReader::new(data);
        let id = match reader.read_var_u32() {
            Ok(id) => id,
            Err(err) => return DecodedPacket::failed(None, UNKNOWN_PACKET, err),
        };
        let body_start = reader.position();

        let entry = self.entry_by_id(id, direction);
        let name = name_of(entry);
        let Some(root) = entry.and_then(ProtocolEntry::root) else {
            debug!(id, name, ?direction, "no schema to decode packet with");
            return DecodedPacket::failed(Some(id), name, DecodeError::UnsupportedPacket { id });
        };

        if let Some(sink) = sink.as_deref_mut() {
            sink.open_group(name, 0);
        }
        let outcome = decode_message(
            root,
            data,
            body_start,
            self.nbt_root,
            sink.as_mut().map(|s| &mut **s as &mut dyn DisplaySink),
        );
        if let Some(sink) = sink {
            sink.close_group(data.len());
        }

        DecodedPacket {
            id: Some(id),
            name: name.to_string(),
            record: outcome.record,
            consumed: outcome.consumed,
            mismatch: outcome.mismatch,
            error: outcome.error,
        }
    }
}

/// Reads the packet id table of a direction: the `mappings` of the mapper
/// that types the first field of the `packet` container. Malformed entries
/// are skipped with a warning.
fn packet_ids(direction: PacketDirection, types: &Map<String, JsonValue>) -> Vec<(u32, String)> {
    let Some(mappings) = types
        .get("packet")
        .and_then(|p| p.get(1))
        .and_then(|fields| fields.get(0))
        .and_then(|field| field.get("type"))
        .and_then(|t| t.get(1))
        .and_then(|mapper| mapper.get("mappings"))
    else {
        return Vec::new();
    };
    let Some(mappings) = mappings.as_object() else {
        warn!(?direction, "packet id mappings are not an object, no packets loaded");
        return Vec::new();
    };

    let mut ids = Vec::with_capacity(mappings.len());
    for (key, name) in mappings {
        let Some(id) = parse_key(key).and_then(|id| u32::try_from(id).ok()) else {
            warn!(?direction, key = %key, "skipping malformed packet id");
            continue;
        };
        let Some(name) = name.as_str() else {
            warn!(?direction, id, "skipping packet id without a name");
            continue;
        };
        ids.push((id, name.to_string()));
    }
    ids
}

/// Reads a protodef document from JSON, or YAML for `.yml`/`.yaml` files.
pub fn load_document(path: &Path) -> Result<JsonValue> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read protocol file: {}", path.display()))?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("yml") | Some("yaml") => {
            let yaml: YamlValue = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML from {}", path.display()))?;
            yaml_to_json(yaml)
        }
        _ => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON from {}", path.display())),
    }
}

// YAML allows non-string keys (hex packet ids are often left unquoted), so
// keys are stringified rather than rejected.
fn yaml_to_json(value: YamlValue) -> Result<JsonValue> {
    Ok(match value {
        YamlValue::Null => JsonValue::Null,
        YamlValue::Bool(b) => JsonValue::Bool(b),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                JsonValue::from(i)
            } else if let Some(u) = n.as_u64() {
                JsonValue::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(JsonValue::Number)
                    .ok_or_else(|| anyhow!("Unrepresentable number in YAML: {}", n))?
            }
        }
        YamlValue::String(s) => JsonValue::String(s),
        YamlValue::Sequence(items) => JsonValue::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        YamlValue::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                let key = match key {
                    YamlValue::String(s) => s,
                    YamlValue::Number(n) => n.to_string(),
                    YamlValue::Bool(b) => b.to_string(),
                    other => return Err(anyhow!("Unsupported YAML key: {:?}", other)),
                };
                map.insert(key, yaml_to_json(value)?);
            }
            JsonValue::Object(map)
        }
        YamlValue::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{render_tree, DisplayTree, HandleCatalog};
    use crate::value::Value;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    fn document() -> JsonValue {
        json!({
            "types": {
                "varint": "native",
                "string": "native",
                "chatText": "string",
                "entityKind": ["mapper", { "type": "varint", "mappings": { "0": "player", "1": "zombie" } }]
            },
            "play": {
                "toClient": { "types": {
                    "packet": ["container", [
                        { "name": "name", "type": ["mapper", { "type": "varint", "mappings": {
                            "0x00": "spawn_entity",
                            "0x01": "chat",
                            "0x02": "metadata"
                        } }] },
                        { "name": "params", "type": ["switch", { "compareTo": "name", "fields": {} }] }
                    ]],
                    "packet_spawn_entity": ["container", [
                        { "name": "entityId", "type": "varint" },
                        { "name": "kind", "type": "entityKind" }
                    ]],
                    "packet_chat": ["container", [{ "name": "message", "type": "chatText" }]],
                    "packet_metadata": ["container", [
                        { "name": "entityId", "type": "varint" },
                        { "name": "metadata", "type": ["entityMetadataLoop", { "endVal": 255, "type": "u8" }] }
                    ]]
                } },
                "toServer": { "types": {
                    "packet": ["container", [
                        { "name": "name", "type": ["mapper", { "type": "varint", "mappings": { "0x05": "chat" } }] }
                    ]],
                    "chatText": "varint",
                    "packet_chat": ["container", [{ "name": "message", "type": "chatText" }]]
                } }
            }
        })
    }

    fn build() -> (ProtocolSet, HandleCatalog) {
        let doc = document();
        let mut catalog = HandleCatalog::new();
        let registry = catalog.build_registry(Edition::Java, &doc);
        let set = ProtocolSet::from_document(&doc, Some("play"), &registry).unwrap();
        (set, catalog)
    }

    #[test]
    fn test_lookups() {
        let (set, _) = build();
        assert_eq!(set.packet_count(PacketDirection::Clientbound), 3);
        assert_eq!(set.packet_count(PacketDirection::Serverbound), 1);
        assert_eq!(set.id_by_name("chat", PacketDirection::Clientbound), Some(1));
        assert_eq!(set.id_by_name("chat", PacketDirection::Serverbound), Some(5));
        assert_eq!(set.id_by_name("missing", PacketDirection::Clientbound), None);
        assert_eq!(set.id_by_name("spawn_entity", PacketDirection::Serverbound), None);

        let entry = set.entry_by_id(0, PacketDirection::Clientbound);
        assert_eq!(name_of(entry), "spawn_entity");
        assert_eq!(name_of(set.entry_by_id(0x40, PacketDirection::Clientbound)), UNKNOWN_PACKET);
        assert_eq!(set.state(), Some("play"));
    }

    #[test]
    fn test_unsupported_packet_is_kept() {
        let (set, _) = build();
        let entry = set.entry_by_id(2, PacketDirection::Clientbound).unwrap();
        assert!(!entry.is_supported());
        assert_eq!(
            entry.compile_error(),
            Some(&SchemaError::NotYetImplemented { tag: "entityMetadataLoop".into() })
        );
        assert!(set.entry_by_id(0, PacketDirection::Clientbound).unwrap().is_supported());
    }

    #[test]
    fn test_local_types_shadow_global() {
        let (set, _) = build();
        let packet = set.decode_packet(&[0x01, 0x02, b'h', b'i'], PacketDirection::Clientbound, None);
        assert_eq!(packet.record.get("message"), Some(&Value::String("hi".into())));

        let packet = set.decode_packet(&[0x05, 0x2A], PacketDirection::Serverbound, None);
        assert!(packet.error.is_none());
        assert_eq!(packet.record.get("message"), Some(&Value::Uint(42)));
    }

    #[test]
    fn test_decode_packet() {
        let (set, catalog) = build();
        let mut tree = DisplayTree::new();
        let packet = set.decode_packet(&[0x00, 0x2A, 0x01], PacketDirection::Clientbound, Some(&mut tree));
        assert_eq!(packet.id, Some(0));
        assert_eq!(packet.name, "spawn_entity");
        assert!(packet.error.is_none());
        assert!(packet.mismatch.is_none());
        assert_eq!(packet.consumed, 2);
        assert_eq!(packet.record.get("entityId"), Some(&Value::Uint(42)));
        assert_eq!(packet.record.get("kind"), Some(&Value::String("zombie".into())));

        let nodes = tree.finish();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].label, "spawn_entity");
        let text = render_tree(&nodes, Some(&catalog));
        assert!(text.contains("entityId"));
        assert!(text.contains("\"zombie\""));
    }

    #[test]
    fn test_decode_unsupported_and_unknown() {
        let (set, _) = build();
        let packet = set.decode_packet(&[0x02, 0x01], PacketDirection::Clientbound, None);
        assert_eq!(packet.name, "metadata");
        assert_eq!(packet.error, Some(DecodeError::UnsupportedPacket { id: 2 }));

        let packet = set.decode_packet(&[0x7F], PacketDirection::Clientbound, None);
        assert_eq!(packet.name, UNKNOWN_PACKET);
        assert_eq!(packet.error, Some(DecodeError::UnsupportedPacket { id: 0x7F }));

        let packet = set.decode_packet(&[], PacketDirection::Clientbound, None);
        assert_eq!(packet.id, None);
        assert!(matches!(packet.error, Some(DecodeError::Underrun { .. })));
    }

    #[test]
    fn test_missing_state() {
        let doc = document();
        let registry = Registry::new(Edition::Java);
        let err = ProtocolSet::from_document(&doc, Some("login"), &registry).unwrap_err();
        assert!(matches!(err, SchemaError::MalformedNode(_)));
    }

    #[test]
    fn test_flat_document_without_state() {
        let doc = json!({
            "toClient": { "types": {
                "packet": ["container", [
                    { "name": "name", "type": ["mapper", { "type": "varint", "mappings": { "7": "ping" } }] }
                ]],
                "packet_ping": ["container", [{ "name": "time", "type": "i64" }]]
            } }
        });
        assert_eq!(state_for(&doc, "play"), None);
        assert_eq!(state_for(&document(), "play"), Some("play"));
        let registry = Registry::new(Edition::Bedrock);
        let set = ProtocolSet::from_document(&doc, None, &registry).unwrap();
        assert_eq!(set.edition(), Edition::Bedrock);
        assert_eq!(set.id_by_name("ping", PacketDirection::Clientbound), Some(7));
        assert_eq!(set.packet_count(PacketDirection::Serverbound), 0);
    }

    #[test]
    fn test_malformed_packet_ids_are_skipped() {
        let doc = json!({
            "toClient": { "types": {
                "packet": ["container", [
                    { "name": "name", "type": ["mapper", { "type": "varint", "mappings": {
                        "0x0g": "broken",
                        "-1": "negative",
                        "3": 42,
                        "7": "ping"
                    } }] }
                ]],
                "packet_ping": ["container", [{ "name": "time", "type": "i64" }]]
            } },
            "toServer": { "types": {
                "packet": ["container", [
                    { "name": "name", "type": ["mapper", { "type": "varint", "mappings": ["chat"] }] }
                ]]
            } }
        });
        let set = ProtocolSet::from_document(&doc, None, &Registry::new(Edition::Java)).unwrap();
        assert_eq!(set.packet_count(PacketDirection::Clientbound), 1);
        assert_eq!(set.id_by_name("ping", PacketDirection::Clientbound), Some(7));
        assert_eq!(set.packet_count(PacketDirection::Serverbound), 0);
    }

    #[test]
    fn test_concurrent_decodes_share_one_set() {
        let (set, _) = build();
        let set = Arc::new(set);
        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let set = Arc::clone(&set);
                thread::spawn(move || {
                    let data = [0x00, i, 0x00];
                    (0..100)
                        .map(|_| set.decode_packet(&data, PacketDirection::Clientbound, None))
                        .last()
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let packet = handle.join().unwrap().unwrap();
            assert_eq!(packet.record.get("entityId"), Some(&Value::Uint(i as u32)));
            assert_eq!(packet.record.get("kind"), Some(&Value::String("player".into())));
        }
    }

    #[test]
    fn test_yaml_keys_are_stringified() {
        let yaml: YamlValue = serde_yaml::from_str("0x01: a\n2: b\nlist: [1, true]\n").unwrap();
        let json = yaml_to_json(yaml).unwrap();
        assert_eq!(json["2"], json!("b"));
        assert_eq!(json["list"], json!([1, true]));
        assert!(json.get("0x01").is_some() || json.get("1").is_some());
    }

    #[test]
    fn test_load_document_from_disk() {
        let dir = std::env::temp_dir().join(format!("mc-protodef-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("protocol.json");
        std::fs::write(&path, document().to_string()).unwrap();

        let registry = Registry::new(Edition::Java);
        let set = ProtocolSet::load(&path, Some("play"), &registry).unwrap();
        assert_eq!(set.packet_count(PacketDirection::Clientbound), 3);
        assert!(load_document(&dir.join("missing.json")).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
