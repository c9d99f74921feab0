//! Payload codecs built on the checked cursor.
//!
//! Bulk payloads (entry lists, key lists, single key/value pairs) use a
//! two-path encoding keyed on their raw size:
//!
//! - below `SWITCH_RAW_DATA_SIZE`: one structured field per item, each
//!   fenced by its own size word;
//! - at or above it: a single contiguous raw section holding the items'
//!   cells back to back.
//!
//! A cell is a length-prefixed blob. The raw size of a payload is the sum
//! of its cell sizes, and that number decides the path on both ends.

use crate::cursor::{BufReader, BufWriter, WireError};
use dkv_types::constant::{MAX_RAW_DATA_SIZE, SWITCH_RAW_DATA_SIZE};
use dkv_types::{
    ChangeNotification, DeviceInfo, Entry, Key, KvStoreType, SecurityLevel, Status, StoreOptions,
    SyncPolicy, Value,
};
use std::collections::HashMap;
use tracing::debug;

pub fn entries_raw_size(entries: &[Entry]) -> usize {
    entries.iter().map(Entry::raw_size).sum()
}

pub fn keys_raw_size(keys: &[Key]) -> usize {
    keys.iter().map(Key::raw_size).sum()
}

fn read_key_cell(r: &mut BufReader<'_>) -> Result<Key, WireError> {
    let bytes = r.read_blob()?;
    if bytes.is_empty() {
        return Err(WireError::Invalid("empty key"));
    }
    Ok(Key::from_raw(bytes.to_vec()))
}

fn read_value_cell(r: &mut BufReader<'_>) -> Result<Value, WireError> {
    Ok(Value::new(r.read_blob()?.to_vec()))
}

/// Single key/value pair, as in a put request:
/// `| raw size | key cell, value cell |` with the cells either inline
/// (small) or inside a raw section (large).
pub fn write_key_value(w: &mut BufWriter, key: &Key, value: &Value) {
    let total = key.raw_size() + value.raw_size();
    w.write_u32(total as u32);
    if total >= SWITCH_RAW_DATA_SIZE {
        debug!(size = total, "encoding key/value as raw section");
    }
    w.write_blob(key.as_bytes());
    w.write_blob(value.as_bytes());
}

pub fn read_key_value(r: &mut BufReader<'_>) -> Result<(Key, Value), WireError> {
    let total = r.read_u32()? as usize;
    if total > MAX_RAW_DATA_SIZE {
        return Err(WireError::Oversized(total));
    }
    if total < SWITCH_RAW_DATA_SIZE {
        let key = read_key_cell(r)?;
        let value = read_value_cell(r)?;
        Ok((key, value))
    } else {
        let mut raw = r.sub_reader(total)?;
        let key = read_key_cell(&mut raw)?;
        let value = read_value_cell(&mut raw)?;
        if !raw.is_exhausted() {
            return Err(WireError::Invalid("raw section size"));
        }
        Ok((key, value))
    }
}

/// Single value, as in a get reply: `| raw size | value cell |`.
pub fn write_value(w: &mut BufWriter, value: &Value) {
    w.write_u32(value.raw_size() as u32);
    w.write_blob(value.as_bytes());
}

pub fn read_value(r: &mut BufReader<'_>) -> Result<Value, WireError> {
    let total = r.read_u32()? as usize;
    if total > MAX_RAW_DATA_SIZE {
        return Err(WireError::Oversized(total));
    }
    if total < SWITCH_RAW_DATA_SIZE {
        read_value_cell(r)
    } else {
        let mut raw = r.sub_reader(total)?;
        let value = read_value_cell(&mut raw)?;
        if !raw.is_exhausted() {
            return Err(WireError::Invalid("raw section size"));
        }
        Ok(value)
    }
}

/// Entry list: `| count | raw size | items... |`. The raw size picks the
/// path; [`write_entries_forced`] lets a caller pin the path when several
/// lists must share one (change notifications).
pub fn write_entries(w: &mut BufWriter, entries: &[Entry]) {
    let total = entries_raw_size(entries);
    write_entries_with(w, entries, total, total >= SWITCH_RAW_DATA_SIZE);
}

pub fn write_entries_forced(w: &mut BufWriter, entries: &[Entry], raw: bool) {
    let total = entries_raw_size(entries);
    write_entries_with(w, entries, total, raw);
}

fn write_entries_with(w: &mut BufWriter, entries: &[Entry], total: usize, raw: bool) {
    w.write_u32(entries.len() as u32);
    w.write_u32(total as u32);
    if raw {
        debug!(count = entries.len(), size = total, "encoding entry list as raw section");
        for entry in entries {
            w.write_blob(entry.key.as_bytes());
            w.write_blob(entry.value.as_bytes());
        }
    } else {
        for entry in entries {
            w.write_u32(entry.raw_size() as u32);
            w.write_blob(entry.key.as_bytes());
            w.write_blob(entry.value.as_bytes());
        }
    }
}

pub fn read_entries(r: &mut BufReader<'_>) -> Result<Vec<Entry>, WireError> {
    let (count, total) = read_list_header(r, 8)?;
    read_entry_items(r, count, total, total >= SWITCH_RAW_DATA_SIZE)
}

pub fn read_entries_forced(r: &mut BufReader<'_>, raw: bool) -> Result<Vec<Entry>, WireError> {
    let (count, total) = read_list_header(r, 8)?;
    read_entry_items(r, count, total, raw)
}

fn read_list_header(r: &mut BufReader<'_>, min_item: usize) -> Result<(usize, usize), WireError> {
    let count = r.read_u32()? as usize;
    let total = r.read_u32()? as usize;
    if total > MAX_RAW_DATA_SIZE {
        return Err(WireError::Oversized(total));
    }
    // Each item occupies at least `min_item` bytes of the declared size and
    // of the message itself. Checked here so a hostile count never drives
    // an allocation the message cannot back.
    if count.saturating_mul(min_item) > total || count.saturating_mul(min_item) > r.remaining() {
        return Err(WireError::Invalid("list count"));
    }
    Ok((count, total))
}

fn read_entry_items(
    r: &mut BufReader<'_>,
    count: usize,
    total: usize,
    raw: bool,
) -> Result<Vec<Entry>, WireError> {
    let mut out = Vec::with_capacity(count);
    if raw {
        let mut section = r.sub_reader(total)?;
        for _ in 0..count {
            let key = read_key_cell(&mut section)?;
            let value = read_value_cell(&mut section)?;
            out.push(Entry { key, value });
        }
        if !section.is_exhausted() {
            return Err(WireError::Invalid("raw section size"));
        }
    } else {
        for _ in 0..count {
            let item_size = r.read_u32()? as usize;
            let mut item = r.sub_reader(item_size)?;
            let key = read_key_cell(&mut item)?;
            let value = read_value_cell(&mut item)?;
            if !item.is_exhausted() {
                return Err(WireError::Invalid("item size"));
            }
            out.push(Entry { key, value });
        }
    }
    Ok(out)
}

/// Key list: same header and path rule as entry lists, cells are bare keys.
pub fn write_keys(w: &mut BufWriter, keys: &[Key]) {
    let total = keys_raw_size(keys);
    w.write_u32(keys.len() as u32);
    w.write_u32(total as u32);
    if total >= SWITCH_RAW_DATA_SIZE {
        debug!(count = keys.len(), size = total, "encoding key list as raw section");
    }
    for key in keys {
        w.write_blob(key.as_bytes());
    }
}

pub fn read_keys(r: &mut BufReader<'_>) -> Result<Vec<Key>, WireError> {
    let (count, total) = read_list_header(r, 4)?;
    if total >= SWITCH_RAW_DATA_SIZE {
        let mut section = r.sub_reader(total)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(read_key_cell(&mut section)?);
        }
        if !section.is_exhausted() {
            return Err(WireError::Invalid("raw section size"));
        }
        Ok(out)
    } else {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(read_key_cell(r)?);
        }
        Ok(out)
    }
}

/// Change notification:
/// `| combined size | inserts | updates | deletes | device | clear | snapshot? |`.
/// The combined raw size of all three lists picks one path for all of them,
/// so a large update list cannot smuggle its siblings onto the wrong path.
pub fn write_change(w: &mut BufWriter, change: &ChangeNotification, snapshot: Option<u64>) {
    let combined = change.raw_size();
    w.write_u32(combined as u32);
    let raw = combined >= SWITCH_RAW_DATA_SIZE;
    write_entries_forced(w, change.insert_entries(), raw);
    write_entries_forced(w, change.update_entries(), raw);
    write_entries_forced(w, change.delete_entries(), raw);
    w.write_string(change.device_id());
    w.write_bool(change.is_clear());
    match snapshot {
        Some(handle) => {
            w.write_u8(1);
            w.write_u64(handle);
        }
        None => w.write_u8(0),
    }
}

pub fn read_change(
    r: &mut BufReader<'_>,
) -> Result<(ChangeNotification, Option<u64>), WireError> {
    let combined = r.read_u32()? as usize;
    if combined > MAX_RAW_DATA_SIZE {
        return Err(WireError::Oversized(combined));
    }
    let raw = combined >= SWITCH_RAW_DATA_SIZE;
    let inserts = read_entries_forced(r, raw)?;
    let updates = read_entries_forced(r, raw)?;
    let deletes = read_entries_forced(r, raw)?;
    let device_id = r.read_string()?;
    let is_clear = r.read_bool()?;
    let snapshot = match r.read_u8()? {
        0 => None,
        1 => Some(r.read_u64()?),
        _ => return Err(WireError::Invalid("snapshot flag")),
    };
    Ok((
        ChangeNotification::new(inserts, updates, deletes, device_id, is_clear),
        snapshot,
    ))
}

/// Store options: fixed-layout header first, then the optional schema as a
/// separate variable-length field.
pub fn write_options(w: &mut BufWriter, options: &StoreOptions) {
    let header = options.header();
    w.write_bool(header.create_if_missing);
    w.write_bool(header.encrypt);
    w.write_bool(header.persist);
    w.write_bool(header.backup);
    w.write_bool(header.auto_sync);
    w.write_u32(header.security_level.code());
    w.write_u32(header.sync_policy.code());
    w.write_u32(header.kvstore_type.code());
    w.write_bool(header.dedicated);
    match &options.schema {
        Some(schema) => {
            w.write_bool(true);
            w.write_string(schema);
        }
        None => w.write_bool(false),
    }
}

pub fn read_options(r: &mut BufReader<'_>) -> Result<StoreOptions, WireError> {
    let create_if_missing = r.read_bool()?;
    let encrypt = r.read_bool()?;
    let persist = r.read_bool()?;
    let backup = r.read_bool()?;
    let auto_sync = r.read_bool()?;
    let security_level =
        SecurityLevel::from_code(r.read_u32()?).ok_or(WireError::Invalid("security level"))?;
    let sync_policy =
        SyncPolicy::from_code(r.read_u32()?).ok_or(WireError::Invalid("sync policy"))?;
    let kvstore_type =
        KvStoreType::from_code(r.read_u32()?).ok_or(WireError::Invalid("store type"))?;
    let dedicated = r.read_bool()?;
    let schema = if r.read_bool()? {
        Some(r.read_string()?)
    } else {
        None
    };
    Ok(StoreOptions {
        create_if_missing,
        encrypt,
        persist,
        backup,
        auto_sync,
        security_level,
        sync_policy,
        kvstore_type,
        dedicated,
        schema,
    })
}

pub fn write_device_list(w: &mut BufWriter, devices: &[DeviceInfo]) {
    w.write_u32(devices.len() as u32);
    for device in devices {
        w.write_string(&device.device_id);
        w.write_string(&device.device_name);
        w.write_string(&device.device_type);
    }
}

pub fn read_device_list(r: &mut BufReader<'_>) -> Result<Vec<DeviceInfo>, WireError> {
    let count = r.read_u32()? as usize;
    // Three length words minimum per record.
    if count.saturating_mul(12) > r.remaining() {
        return Err(WireError::Invalid("device count"));
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(DeviceInfo {
            device_id: r.read_string()?,
            device_name: r.read_string()?,
            device_type: r.read_string()?,
        });
    }
    Ok(out)
}

/// Per-device sync outcome, carried by the sync-completed push.
pub fn write_sync_result(w: &mut BufWriter, results: &HashMap<String, Status>) {
    w.write_u32(results.len() as u32);
    for (device, status) in results {
        w.write_string(device);
        w.write_u32(status.code());
    }
}

pub fn read_sync_result(r: &mut BufReader<'_>) -> Result<HashMap<String, Status>, WireError> {
    let count = r.read_u32()? as usize;
    if count.saturating_mul(8) > r.remaining() {
        return Err(WireError::Invalid("sync result count"));
    }
    let mut out = HashMap::with_capacity(count);
    for _ in 0..count {
        let device = r.read_string()?;
        let status = Status::from_code(r.read_u32()?);
        out.insert(device, status);
    }
    Ok(out)
}
