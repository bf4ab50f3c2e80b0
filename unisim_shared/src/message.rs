//! Protocol messages.
//!
//! Every message is addressed by two optional ids (physics id and session id)
//! and carries one [`MessageBody`]. Each body has a fixed schema; fields a
//! sender leaves out decode as `None`, never as zero.

use std::fmt;

use crate::{
    codec::{CodecError, FieldMap, Tag, Value, TAG_CLIENT_ID, TAG_KIND, TAG_SERVER_ID},
    math::{Vec3, Vec4},
    spectrum::Spectrum,
};

/// Wire discriminators. Gaps are kinds this server never speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Hello = 1,
    PhysicalProperties = 2,
    VisualDataEnable = 4,
    VisualData = 7,
    Beam = 8,
    Collision = 9,
    Spawn = 10,
    ScanResult = 11,
    ScanQuery = 12,
    ScanResponse = 13,
    Goodbye = 14,
    Directory = 15,
}

impl MessageKind {
    pub fn from_wire(v: i64) -> Option<Self> {
        Some(match v {
            1 => Self::Hello,
            2 => Self::PhysicalProperties,
            4 => Self::VisualDataEnable,
            7 => Self::VisualData,
            8 => Self::Beam,
            9 => Self::Collision,
            10 => Self::Spawn,
            11 => Self::ScanResult,
            12 => Self::ScanQuery,
            13 => Self::ScanResponse,
            14 => Self::Goodbye,
            15 => Self::Directory,
            _ => return None,
        })
    }
}

/// What a beam does when it lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BeamKind {
    Comm,
    Weapon,
    Scan,
    /// Return beam produced by a scan.
    ScanResult,
}

impl BeamKind {
    pub fn as_wire(self) -> &'static str {
        match self {
            BeamKind::Comm => "COMM",
            BeamKind::Weapon => "WEAP",
            BeamKind::Scan => "SCAN",
            BeamKind::ScanResult => "SCRE",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        Some(match s {
            "COMM" => BeamKind::Comm,
            "WEAP" => BeamKind::Weapon,
            "SCAN" => BeamKind::Scan,
            "SCRE" => BeamKind::ScanResult,
            _ => return None,
        })
    }
}

/// What hit a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollisionKind {
    Physical,
    Beam(BeamKind),
    Radiation,
}

impl CollisionKind {
    pub fn as_wire(self) -> &'static str {
        match self {
            CollisionKind::Physical => "PHYS",
            CollisionKind::Beam(b) => b.as_wire(),
            CollisionKind::Radiation => "RADN",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "PHYS" => Some(CollisionKind::Physical),
            "RADN" => Some(CollisionKind::Radiation),
            other => BeamKind::from_wire(other).map(CollisionKind::Beam),
        }
    }
}

impl fmt::Display for CollisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Body fields shared by Spawn and PhysicalProperties.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BodyProperties {
    pub obj_type: Option<String>,
    pub mass: Option<f64>,
    pub position: Option<Vec3>,
    pub velocity: Option<Vec3>,
    pub orientation: Option<Vec4>,
    pub thrust: Option<Vec3>,
    pub radius: Option<f64>,
    pub spectrum: Option<Spectrum>,
}

impl BodyProperties {
    fn write(&self, m: &mut FieldMap, base: Tag) {
        m.push_opt(base, self.obj_type.clone());
        m.push_opt(base + 1, self.mass);
        m.push_opt(base + 2, self.position);
        m.push_opt(base + 3, self.velocity);
        m.push_opt(base + 4, self.orientation);
        m.push_opt(base + 5, self.thrust);
        m.push_opt(base + 6, self.radius);
        m.push_opt(base + 7, self.spectrum.clone());
    }

    fn read(m: &FieldMap, base: Tag) -> Result<Self, CodecError> {
        Ok(Self {
            obj_type: m.string(base)?,
            mass: m.float(base + 1)?,
            position: m.vec3(base + 2)?,
            velocity: m.vec3(base + 3)?,
            orientation: m.vec4(base + 4)?,
            thrust: m.vec3(base + 5)?,
            radius: m.float(base + 6)?,
            spectrum: read_spectrum(m, base + 7)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Spawn {
    pub is_smart: Option<bool>,
    pub props: BodyProperties,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VisualDataEnable {
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VisualData {
    pub phys_id: Option<i64>,
    pub radius: Option<f64>,
    pub position: Option<Vec3>,
    pub orientation: Option<Vec4>,
}

/// A request to fire a beam.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BeamFire {
    pub origin: Option<Vec3>,
    pub velocity: Option<Vec3>,
    pub up: Option<Vec3>,
    pub spread_h: Option<f64>,
    pub spread_v: Option<f64>,
    pub energy: Option<f64>,
    pub kind: Option<BeamKind>,
    pub comm_msg: Option<String>,
    pub spectrum: Option<Spectrum>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Collision {
    /// Contact point relative to the body's centre.
    pub position: Option<Vec3>,
    /// Direction the other party was moving, relative to the body.
    pub direction: Option<Vec3>,
    pub energy: Option<f64>,
    pub kind: Option<CollisionKind>,
    pub comm_msg: Option<String>,
    pub spectrum: Option<Spectrum>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanResult {
    pub obj_type: Option<String>,
    pub mass: Option<f64>,
    pub position: Option<Vec3>,
    pub velocity: Option<Vec3>,
    pub orientation: Option<Vec4>,
    pub thrust: Option<Vec3>,
    pub radius: Option<f64>,
    pub data: Option<String>,
    pub beam_spectrum: Option<Spectrum>,
    pub obj_spectrum: Option<Spectrum>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanQuery {
    pub scan_id: Option<i64>,
    pub energy: Option<f64>,
    pub direction: Option<Vec3>,
    pub spectrum: Option<Spectrum>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanResponse {
    pub scan_id: Option<i64>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryItem {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Directory {
    pub item_type: Option<String>,
    pub items: Vec<DirectoryItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Hello,
    PhysicalProperties(BodyProperties),
    VisualDataEnable(VisualDataEnable),
    VisualData(VisualData),
    Beam(BeamFire),
    Collision(Collision),
    Spawn(Spawn),
    ScanResult(ScanResult),
    ScanQuery(ScanQuery),
    ScanResponse(ScanResponse),
    Goodbye,
    Directory(Directory),
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Hello => MessageKind::Hello,
            MessageBody::PhysicalProperties(_) => MessageKind::PhysicalProperties,
            MessageBody::VisualDataEnable(_) => MessageKind::VisualDataEnable,
            MessageBody::VisualData(_) => MessageKind::VisualData,
            MessageBody::Beam(_) => MessageKind::Beam,
            MessageBody::Collision(_) => MessageKind::Collision,
            MessageBody::Spawn(_) => MessageKind::Spawn,
            MessageBody::ScanResult(_) => MessageKind::ScanResult,
            MessageBody::ScanQuery(_) => MessageKind::ScanQuery,
            MessageBody::ScanResponse(_) => MessageKind::ScanResponse,
            MessageBody::Goodbye => MessageKind::Goodbye,
            MessageBody::Directory(_) => MessageKind::Directory,
        }
    }
}

/// Addressed message envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Physics id on the universe side.
    pub server_id: Option<i64>,
    /// Id chosen by the peer for its own bookkeeping.
    pub client_id: Option<i64>,
    pub body: MessageBody,
}

impl Message {
    pub fn new(body: MessageBody) -> Self {
        Self {
            server_id: None,
            client_id: None,
            body,
        }
    }

    pub fn with_server_id(mut self, id: i64) -> Self {
        self.server_id = Some(id);
        self
    }

    pub fn with_client_id(mut self, id: i64) -> Self {
        self.client_id = Some(id);
        self
    }

    /// Copies both ids from `other`, for replies.
    pub fn addressed_like(mut self, other: &Message) -> Self {
        self.server_id = other.server_id;
        self.client_id = other.client_id;
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn to_fields(&self) -> FieldMap {
        let mut m = FieldMap::new();
        m.push(TAG_KIND, Value::Int(self.kind() as i64));
        m.push_opt(TAG_SERVER_ID, self.server_id);
        m.push_opt(TAG_CLIENT_ID, self.client_id);

        match &self.body {
            MessageBody::Hello | MessageBody::Goodbye => {}
            MessageBody::PhysicalProperties(p) => p.write(&mut m, 3),
            MessageBody::VisualDataEnable(v) => m.push_opt(3, v.enabled),
            MessageBody::VisualData(v) => {
                m.push_opt(3, v.phys_id);
                m.push_opt(4, v.radius);
                m.push_opt(5, v.position);
                m.push_opt(6, v.orientation);
            }
            MessageBody::Beam(b) => {
                m.push_opt(3, b.origin);
                m.push_opt(4, b.velocity);
                m.push_opt(5, b.up);
                m.push_opt(6, b.spread_h);
                m.push_opt(7, b.spread_v);
                m.push_opt(8, b.energy);
                m.push_opt(9, b.kind.map(|k| k.as_wire().to_string()));
                m.push_opt(10, b.comm_msg.clone());
                m.push_opt(11, b.spectrum.clone());
            }
            MessageBody::Collision(c) => {
                m.push_opt(3, c.position);
                m.push_opt(4, c.direction);
                m.push_opt(5, c.energy);
                m.push_opt(6, c.kind.map(|k| k.as_wire().to_string()));
                m.push_opt(7, c.comm_msg.clone());
                m.push_opt(8, c.spectrum.clone());
            }
            MessageBody::Spawn(s) => {
                m.push_opt(3, s.is_smart);
                s.props.write(&mut m, 4);
            }
            MessageBody::ScanResult(r) => {
                m.push_opt(3, r.obj_type.clone());
                m.push_opt(4, r.mass);
                m.push_opt(5, r.position);
                m.push_opt(6, r.velocity);
                m.push_opt(7, r.orientation);
                m.push_opt(8, r.thrust);
                m.push_opt(9, r.radius);
                m.push_opt(10, r.data.clone());
                m.push_opt(11, r.beam_spectrum.clone());
                m.push_opt(12, r.obj_spectrum.clone());
            }
            MessageBody::ScanQuery(q) => {
                m.push_opt(3, q.scan_id);
                m.push_opt(4, q.energy);
                m.push_opt(5, q.direction);
                m.push_opt(6, q.spectrum.clone());
            }
            MessageBody::ScanResponse(r) => {
                m.push_opt(3, r.scan_id);
                m.push_opt(4, r.data.clone());
            }
            MessageBody::Directory(d) => {
                m.push_opt(3, d.item_type.clone());
                if !d.items.is_empty() {
                    let mut items = FieldMap::new();
                    for (i, item) in d.items.iter().enumerate() {
                        let mut entry = FieldMap::new();
                        entry.push(0, Value::Int(item.id));
                        entry.push(1, Value::Str(item.name.clone()));
                        items.push(i as Tag, Value::Map(entry));
                    }
                    m.push(4, Value::Map(items));
                }
            }
        }
        m
    }

    pub fn from_fields(m: &FieldMap) -> Result<Self, CodecError> {
        let raw_kind = m
            .int(TAG_KIND)?
            .ok_or_else(|| CodecError::malformed("missing message kind"))?;
        let kind = MessageKind::from_wire(raw_kind).ok_or(CodecError::UnknownMessageKind(raw_kind))?;

        let body = match kind {
            MessageKind::Hello => MessageBody::Hello,
            MessageKind::Goodbye => MessageBody::Goodbye,
            MessageKind::PhysicalProperties => {
                MessageBody::PhysicalProperties(BodyProperties::read(m, 3)?)
            }
            MessageKind::VisualDataEnable => MessageBody::VisualDataEnable(VisualDataEnable {
                enabled: m.flag(3)?,
            }),
            MessageKind::VisualData => MessageBody::VisualData(VisualData {
                phys_id: m.int(3)?,
                radius: m.float(4)?,
                position: m.vec3(5)?,
                orientation: m.vec4(6)?,
            }),
            MessageKind::Beam => MessageBody::Beam(BeamFire {
                origin: m.vec3(3)?,
                velocity: m.vec3(4)?,
                up: m.vec3(5)?,
                spread_h: m.float(6)?,
                spread_v: m.float(7)?,
                energy: m.float(8)?,
                kind: m
                    .string(9)?
                    .map(|s| {
                        BeamKind::from_wire(&s)
                            .ok_or_else(|| CodecError::malformed(format!("unknown beam type {s:?}")))
                    })
                    .transpose()?,
                comm_msg: m.string(10)?,
                spectrum: read_spectrum(m, 11)?,
            }),
            MessageKind::Collision => MessageBody::Collision(Collision {
                position: m.vec3(3)?,
                direction: m.vec3(4)?,
                energy: m.float(5)?,
                kind: m
                    .string(6)?
                    .map(|s| {
                        CollisionKind::from_wire(&s).ok_or_else(|| {
                            CodecError::malformed(format!("unknown collision type {s:?}"))
                        })
                    })
                    .transpose()?,
                comm_msg: m.string(7)?,
                spectrum: read_spectrum(m, 8)?,
            }),
            MessageKind::Spawn => MessageBody::Spawn(Spawn {
                is_smart: m.flag(3)?,
                props: BodyProperties::read(m, 4)?,
            }),
            MessageKind::ScanResult => MessageBody::ScanResult(ScanResult {
                obj_type: m.string(3)?,
                mass: m.float(4)?,
                position: m.vec3(5)?,
                velocity: m.vec3(6)?,
                orientation: m.vec4(7)?,
                thrust: m.vec3(8)?,
                radius: m.float(9)?,
                data: m.string(10)?,
                beam_spectrum: read_spectrum(m, 11)?,
                obj_spectrum: read_spectrum(m, 12)?,
            }),
            MessageKind::ScanQuery => MessageBody::ScanQuery(ScanQuery {
                scan_id: m.int(3)?,
                energy: m.float(4)?,
                direction: m.vec3(5)?,
                spectrum: read_spectrum(m, 6)?,
            }),
            MessageKind::ScanResponse => MessageBody::ScanResponse(ScanResponse {
                scan_id: m.int(3)?,
                data: m.string(4)?,
            }),
            MessageKind::Directory => {
                let mut items = Vec::new();
                if let Some(list) = m.map(4)? {
                    for (_, entry) in list.iter() {
                        let Value::Map(entry) = entry else {
                            return Err(CodecError::malformed("directory entry is not a map"));
                        };
                        items.push(DirectoryItem {
                            id: entry
                                .int(0)?
                                .ok_or_else(|| CodecError::malformed("directory entry missing id"))?,
                            name: entry.string(1)?.ok_or_else(|| {
                                CodecError::malformed("directory entry missing name")
                            })?,
                        });
                    }
                }
                MessageBody::Directory(Directory {
                    item_type: m.string(3)?,
                    items,
                })
            }
        };

        Ok(Message {
            server_id: m.int(TAG_SERVER_ID)?,
            client_id: m.int(TAG_CLIENT_ID)?,
            body,
        })
    }
}

fn read_spectrum(m: &FieldMap, tag: Tag) -> Result<Option<Spectrum>, CodecError> {
    m.map(tag)?.map(Spectrum::from_fields).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{decode, encode},
        spectrum::SpectrumComponent,
    };

    fn spectrum() -> Spectrum {
        Spectrum::new(vec![
            SpectrumComponent {
                wavelength: 500e-9,
                power: 3.0,
            },
            SpectrumComponent {
                wavelength: 1e-3,
                power: 0.25,
            },
        ])
    }

    fn samples() -> Vec<Message> {
        let props = BodyProperties {
            obj_type: Some("Ship".into()),
            mass: Some(1000.0),
            position: Some(Vec3::new(1.0, 2.0, 3.0)),
            velocity: Some(Vec3::new(0.0, -1.0, 0.5)),
            orientation: Some(Vec4::new(1.0, 0.0, 0.0, 1.0)),
            thrust: Some(Vec3::ZERO),
            radius: Some(10.0),
            spectrum: Some(spectrum()),
        };
        vec![
            Message::new(MessageBody::Hello).with_client_id(17),
            Message::new(MessageBody::Goodbye).with_server_id(4),
            Message::new(MessageBody::Spawn(Spawn {
                is_smart: Some(true),
                props: props.clone(),
            }))
            .with_client_id(3),
            Message::new(MessageBody::PhysicalProperties(BodyProperties {
                thrust: Some(Vec3::new(5.0, 0.0, 0.0)),
                ..Default::default()
            }))
            .with_server_id(9),
            Message::new(MessageBody::Beam(BeamFire {
                origin: Some(Vec3::ZERO),
                velocity: Some(Vec3::new(299_792_458.0, 0.0, 0.0)),
                up: Some(Vec3::new(0.0, 0.0, 1.0)),
                spread_h: Some(0.1),
                spread_v: Some(0.2),
                energy: Some(1e6),
                kind: Some(BeamKind::Comm),
                comm_msg: Some("hail".into()),
                spectrum: Some(spectrum()),
            })),
            Message::new(MessageBody::Collision(Collision {
                position: Some(Vec3::new(1.0, 0.0, 0.0)),
                direction: Some(Vec3::new(-1.0, 0.0, 0.0)),
                energy: Some(42.0),
                kind: Some(CollisionKind::Radiation),
                comm_msg: None,
                spectrum: None,
            })),
            Message::new(MessageBody::ScanQuery(ScanQuery {
                scan_id: Some(12),
                energy: Some(3.5),
                direction: Some(Vec3::new(0.0, 1.0, 0.0)),
                spectrum: None,
            })),
            Message::new(MessageBody::ScanResponse(ScanResponse {
                scan_id: Some(12),
                data: Some("[\"Ship\", \"Enterprise\"]".into()),
            })),
            Message::new(MessageBody::ScanResult(ScanResult {
                obj_type: Some("Asteroid".into()),
                mass: Some(1e9),
                data: Some("rocks".into()),
                obj_spectrum: Some(spectrum()),
                ..Default::default()
            })),
            Message::new(MessageBody::VisualDataEnable(VisualDataEnable {
                enabled: Some(false),
            })),
            Message::new(MessageBody::VisualData(VisualData {
                phys_id: Some(5),
                radius: Some(2.0),
                position: Some(Vec3::new(-1.0, 0.0, 0.0)),
                orientation: Some(Vec4::new(1.0, 0.0, 0.0, 1.0)),
            }))
            .with_server_id(-1),
            Message::new(MessageBody::Directory(Directory {
                item_type: Some("CLASS".into()),
                items: vec![
                    DirectoryItem {
                        id: 1,
                        name: "Scout".into(),
                    },
                    DirectoryItem {
                        id: 2,
                        name: "Frigate".into(),
                    },
                ],
            })),
        ]
    }

    #[test]
    fn every_kind_roundtrips() {
        for msg in samples() {
            let frame = encode(&msg);
            assert_eq!(decode(&frame).unwrap(), msg, "kind {:?}", msg.kind());
        }
    }

    #[test]
    fn absent_fields_stay_absent() {
        let msg = Message::new(MessageBody::PhysicalProperties(BodyProperties {
            mass: Some(0.0),
            ..Default::default()
        }));
        let MessageBody::PhysicalProperties(p) = decode(&encode(&msg)).unwrap().body else {
            panic!("wrong kind");
        };
        assert_eq!(p.mass, Some(0.0));
        assert_eq!(p.radius, None);
        assert_eq!(p.position, None);
    }

    #[test]
    fn unknown_beam_type_is_malformed() {
        let mut m = FieldMap::new();
        m.push(TAG_KIND, Value::Int(MessageKind::Beam as i64));
        m.push(9, Value::Str("LASR".into()));
        assert!(matches!(
            Message::from_fields(&m),
            Err(CodecError::MalformedFrame(_))
        ));
    }
}
