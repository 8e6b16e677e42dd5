//! The protocol/field registry.
//!
//! Mirrors `proto.c`/`net_protos.c`/`link_protos.c` from the original source:
//! a handful of self-registering layer modules populate two name-keyed maps
//! at startup (`protos`, `fields`), and the rest of the compiler only ever
//! calls [`Registry::lookup`] / [`Registry::lookup_proto`]. The hand-rolled
//! `htable` of the original is replaced with an ordinary interned-key map —
//! there is no hot path here that a hash table's extra machinery would pay
//! for at this scale.

use crate::common::{Id, Map};

/// Which layer of the packet a protocol's header lives at. Informational only
/// in this compiler (used for diagnostics/documentation); header composition
/// itself is expressed directly through each [`FieldDescriptor`]'s offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    Link,
    Network,
    Transport,
}

/// A registered protocol: its layer and the byte offset of its header from
/// the start of the packet.
#[derive(Clone, Debug)]
pub struct ProtoDescriptor {
    pub name: Id,
    pub layer: Layer,
    pub base_offset: u32,
}

/// A registered `proto.field` name: which protocol it belongs to, the byte
/// offset from that protocol's base, the load size in bytes, and a mask
/// applied to the loaded value (`0xffff_ffff` meaning "no mask").
#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    pub name: Id,
    pub proto: Id,
    pub offset: u32,
    pub len: u32,
    pub mask: u32,
}

impl FieldDescriptor {
    fn new(proto: &str, field: &str, offset: u32, len: u32, mask: u32) -> Self {
        FieldDescriptor {
            name: Id::from(format!("{proto}.{field}")),
            proto: Id::from(proto.to_string()),
            offset,
            len,
            mask,
        }
    }
}

/// Name-keyed lookup tables for protocols and their fields. Built once and
/// treated as immutable afterwards; concurrent reads of a shared `&Registry`
/// are safe (it holds nothing but plain owned data).
pub struct Registry {
    protos: Map<Id, ProtoDescriptor>,
    fields: Map<Id, FieldDescriptor>,
}

impl Registry {
    /// An empty registry with no protocols registered.
    pub fn new() -> Self {
        Registry {
            protos: Map::new(),
            fields: Map::new(),
        }
    }

    /// A registry seeded with the link- and network-layer protocols this
    /// compiler ships with, mirroring `link_protos_register` /
    /// `net_protos_register` in the original source.
    pub fn with_builtins() -> Self {
        let mut reg = Registry::new();
        reg.register_link_protos();
        reg.register_net_protos();
        reg
    }

    fn register(&mut self, proto: ProtoDescriptor, fields: &[(&str, u32, u32, u32)]) {
        let name = proto.name;
        self.protos.insert(name, proto);
        for &(field, offset, len, mask) in fields {
            let fd = FieldDescriptor::new(&name, field, offset, len, mask);
            self.fields.insert(fd.name, fd);
        }
    }

    /// `link_protos.c`: the Ethernet header starts at offset 0.
    fn register_link_protos(&mut self) {
        self.register(
            ProtoDescriptor {
                name: Id::from("ether".to_string()),
                layer: Layer::Link,
                base_offset: 0,
            },
            &[("type", 12, 2, 0xffff_ffff)],
        );
    }

    /// `net_protos.c`: IPv4 follows directly after a non-VLAN Ethernet header.
    fn register_net_protos(&mut self) {
        self.register(
            ProtoDescriptor {
                name: Id::from("ipv4".to_string()),
                layer: Layer::Network,
                base_offset: 14,
            },
            &[("ver", 0, 1, 0x0f), ("ihl", 0, 1, 0xf0)],
        );
    }

    /// Look up a dotted `proto.field` name.
    pub fn lookup(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(&Id::from(name.to_string()))
    }

    /// Look up a bare protocol name.
    pub fn lookup_proto(&self, name: &str) -> Option<&ProtoDescriptor> {
        self.protos.get(&Id::from(name.to_string()))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ether_type_resolves() {
        let reg = Registry::with_builtins();
        let f = reg.lookup("ether.type").expect("ether.type registered");
        assert_eq!(f.offset, 12);
        assert_eq!(f.len, 2);
        assert_eq!(f.mask, 0xffff_ffff);
    }

    #[test]
    fn ipv4_ihl_resolves_with_mask() {
        let reg = Registry::with_builtins();
        let f = reg.lookup("ipv4.ihl").expect("ipv4.ihl registered");
        assert_eq!(f.mask, 0xf0);
    }

    #[test]
    fn unknown_field_is_absent() {
        let reg = Registry::with_builtins();
        assert!(reg.lookup("tcp.port").is_none());
    }

    #[test]
    fn proto_base_offsets() {
        let reg = Registry::with_builtins();
        assert_eq!(reg.lookup_proto("ether").unwrap().base_offset, 0);
        assert_eq!(reg.lookup_proto("ipv4").unwrap().base_offset, 14);
    }
}
