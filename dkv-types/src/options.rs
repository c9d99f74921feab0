//! Store configuration and the small enums that ride along with requests.

use bytes::Bytes;

/// What kinds of change a subscriber wants to hear about. Codes are bit
/// flags so `All` is the union of the other three.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SubscribeType {
    Insert,
    Update,
    Delete,
    #[default]
    All,
}

impl SubscribeType {
    pub fn code(self) -> u32 {
        match self {
            SubscribeType::Insert => 1,
            SubscribeType::Update => 2,
            SubscribeType::Delete => 4,
            SubscribeType::All => 7,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(SubscribeType::Insert),
            2 => Some(SubscribeType::Update),
            4 => Some(SubscribeType::Delete),
            7 => Some(SubscribeType::All),
            _ => None,
        }
    }

    /// Whether this subscription covers changes of `kind`.
    pub fn covers(self, kind: SubscribeType) -> bool {
        self.code() & kind.code() == kind.code()
    }
}

/// Direction of a device sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncMode {
    Push,
    Pull,
    PushPull,
}

impl SyncMode {
    pub fn code(self) -> u32 {
        match self {
            SyncMode::Push => 0,
            SyncMode::Pull => 1,
            SyncMode::PushPull => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(SyncMode::Push),
            1 => Some(SyncMode::Pull),
            2 => Some(SyncMode::PushPull),
            _ => None,
        }
    }
}

/// Data sensitivity label attached to a store at creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityLevel {
    #[default]
    NoLabel,
    S0,
    S1,
    S2,
    S3,
    S4,
}

impl SecurityLevel {
    pub fn code(self) -> u32 {
        match self {
            SecurityLevel::NoLabel => 0,
            SecurityLevel::S0 => 1,
            SecurityLevel::S1 => 2,
            SecurityLevel::S2 => 3,
            SecurityLevel::S3 => 4,
            SecurityLevel::S4 => 5,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(SecurityLevel::NoLabel),
            1 => Some(SecurityLevel::S0),
            2 => Some(SecurityLevel::S1),
            3 => Some(SecurityLevel::S2),
            4 => Some(SecurityLevel::S3),
            5 => Some(SecurityLevel::S4),
            _ => None,
        }
    }
}

/// Versioning model of the underlying store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KvStoreType {
    #[default]
    SingleVersion,
    MultiVersion,
    LocalOnly,
}

impl KvStoreType {
    pub fn code(self) -> u32 {
        match self {
            KvStoreType::SingleVersion => 0,
            KvStoreType::MultiVersion => 1,
            KvStoreType::LocalOnly => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(KvStoreType::SingleVersion),
            1 => Some(KvStoreType::MultiVersion),
            2 => Some(KvStoreType::LocalOnly),
            _ => None,
        }
    }
}

/// When the store pushes local mutations to peers on its own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncPolicy {
    #[default]
    Manual,
    Immediate,
    OnReady,
}

impl SyncPolicy {
    pub fn code(self) -> u32 {
        match self {
            SyncPolicy::Manual => 0,
            SyncPolicy::Immediate => 1,
            SyncPolicy::OnReady => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(SyncPolicy::Manual),
            1 => Some(SyncPolicy::Immediate),
            2 => Some(SyncPolicy::OnReady),
            _ => None,
        }
    }
}

/// Options given when opening a store. The variable-length `schema`
/// travels separately from the fixed-layout header, see
/// [`StoreOptions::header`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreOptions {
    pub create_if_missing: bool,
    pub encrypt: bool,
    pub persist: bool,
    pub backup: bool,
    pub auto_sync: bool,
    pub security_level: SecurityLevel,
    pub sync_policy: SyncPolicy,
    pub kvstore_type: KvStoreType,
    /// When set, the store is private to the opening caller.
    pub dedicated: bool,
    pub schema: Option<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            create_if_missing: true,
            encrypt: false,
            persist: true,
            backup: false,
            auto_sync: false,
            security_level: SecurityLevel::default(),
            sync_policy: SyncPolicy::default(),
            kvstore_type: KvStoreType::default(),
            dedicated: false,
            schema: None,
        }
    }
}

impl StoreOptions {
    /// The fixed-size part that crosses the wire as a flat record.
    pub fn header(&self) -> StoreOptionsHeader {
        StoreOptionsHeader {
            create_if_missing: self.create_if_missing,
            encrypt: self.encrypt,
            persist: self.persist,
            backup: self.backup,
            auto_sync: self.auto_sync,
            security_level: self.security_level,
            sync_policy: self.sync_policy,
            kvstore_type: self.kvstore_type,
            dedicated: self.dedicated,
        }
    }

    pub fn from_parts(header: StoreOptionsHeader, schema: Option<String>) -> Self {
        StoreOptions {
            create_if_missing: header.create_if_missing,
            encrypt: header.encrypt,
            persist: header.persist,
            backup: header.backup,
            auto_sync: header.auto_sync,
            security_level: header.security_level,
            sync_policy: header.sync_policy,
            kvstore_type: header.kvstore_type,
            dedicated: header.dedicated,
            schema,
        }
    }
}

/// Wire-safe fixed-layout view of [`StoreOptions`], with the schema split
/// out so the flat record never embeds variable-length data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreOptionsHeader {
    pub create_if_missing: bool,
    pub encrypt: bool,
    pub persist: bool,
    pub backup: bool,
    pub auto_sync: bool,
    pub security_level: SecurityLevel,
    pub sync_policy: SyncPolicy,
    pub kvstore_type: KvStoreType,
    pub dedicated: bool,
}

/// Commands carried by the out-of-band `control` operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlCmd {
    SetSyncParam,
    GetSyncParam,
}

impl ControlCmd {
    pub fn code(self) -> u32 {
        match self {
            ControlCmd::SetSyncParam => 1,
            ControlCmd::GetSyncParam => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(ControlCmd::SetSyncParam),
            2 => Some(ControlCmd::GetSyncParam),
            _ => None,
        }
    }
}

/// Opaque parameter blob for [`ControlCmd`] requests and replies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KvParam(pub Bytes);

impl KvParam {
    pub fn new(data: impl Into<Bytes>) -> Self {
        KvParam(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn raw_size(&self) -> usize {
        4 + self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_split_and_rejoin() {
        let options = StoreOptions {
            encrypt: true,
            security_level: SecurityLevel::S2,
            schema: Some("{\"version\":1}".into()),
            ..StoreOptions::default()
        };
        let rebuilt = StoreOptions::from_parts(options.header(), options.schema.clone());
        assert_eq!(rebuilt, options);
    }

    #[test]
    fn subscribe_type_codes_are_bit_flags() {
        assert_eq!(
            SubscribeType::Insert.code() | SubscribeType::Update.code() | SubscribeType::Delete.code(),
            SubscribeType::All.code()
        );
        for kind in [
            SubscribeType::Insert,
            SubscribeType::Update,
            SubscribeType::Delete,
        ] {
            assert_eq!(SubscribeType::from_code(kind.code()), Some(kind));
            assert!(SubscribeType::All.covers(kind));
            assert!(!kind.covers(SubscribeType::All));
        }
        assert_eq!(SubscribeType::from_code(7), Some(SubscribeType::All));
        assert_eq!(SubscribeType::from_code(0), None);
        assert_eq!(SubscribeType::from_code(8), None);
    }
}
