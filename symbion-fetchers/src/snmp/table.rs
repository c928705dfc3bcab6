use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::backend::{oid_key, SnmpBackend, WalkRows};
use super::tree::{BackendSnmpTree, OidColumn, OidEncoding, SnmpTable, SnmpValue};
use super::walk_cache::WalkCache;
use super::SnmpError;

/// Walks every column of `tree` and joins the results on their row index.
///
/// Rows are ordered by numeric OID index; missing cells become empty
/// strings. A tree whose columns all come back empty yields no rows.
pub fn get_snmp_table(
    tree: &BackendSnmpTree,
    walk_cache: &mut WalkCache,
    backend: &mut dyn SnmpBackend,
    character_encoding: Option<&str>,
) -> Result<SnmpTable, SnmpError> {
    let mut columns: Vec<Option<HashMap<String, Vec<u8>>>> = Vec::with_capacity(tree.oids.len());
    let mut indices: BTreeMap<Vec<u32>, String> = BTreeMap::new();

    for spec in &tree.oids {
        let OidColumn::Column(column) = &spec.column else {
            columns.push(None);
            continue;
        };
        let fetch_oid = format!("{}.{}", tree.base, column);
        let rows = walk(&fetch_oid, spec.save_to_cache, walk_cache, backend)?;
        let mut cells = HashMap::with_capacity(rows.len());
        for (oid, value) in rows {
            let index = oid
                .strip_prefix(&fetch_oid)
                .map(|rest| rest.trim_start_matches('.'))
                .unwrap_or(oid.as_str())
                .to_string();
            indices.entry(oid_key(&index)).or_insert_with(|| index.clone());
            cells.insert(index, value);
        }
        columns.push(Some(cells));
    }

    if columns.iter().flatten().all(|cells| cells.is_empty()) {
        return Ok(Vec::new());
    }

    Ok(indices
        .values()
        .map(|index| {
            tree.oids
                .iter()
                .zip(&columns)
                .map(|(spec, cells)| match cells {
                    None => SnmpValue::Text(index.clone()),
                    Some(cells) => match cells.get(index) {
                        Some(raw) => decode(raw, spec.encoding, character_encoding),
                        None => SnmpValue::Text(String::new()),
                    },
                })
                .collect()
        })
        .collect())
}

fn walk(
    fetch_oid: &str,
    save_to_cache: bool,
    walk_cache: &mut WalkCache,
    backend: &mut dyn SnmpBackend,
) -> Result<WalkRows, SnmpError> {
    if let Some(rows) = walk_cache.get(fetch_oid) {
        debug!("Walk of {} served from walk cache", fetch_oid);
        return Ok(rows.clone());
    }
    let rows = backend.walk(fetch_oid)?;
    walk_cache.insert(fetch_oid.to_string(), save_to_cache, rows.clone());
    Ok(rows)
}

fn decode(raw: &[u8], encoding: OidEncoding, character_encoding: Option<&str>) -> SnmpValue {
    match encoding {
        OidEncoding::Binary => SnmpValue::Binary(raw.to_vec()),
        OidEncoding::String => SnmpValue::Text(decode_text(raw, character_encoding)),
    }
}

fn decode_text(raw: &[u8], character_encoding: Option<&str>) -> String {
    let latin1 = |raw: &[u8]| raw.iter().map(|b| char::from(*b)).collect::<String>();
    match character_encoding.map(str::to_ascii_lowercase).as_deref() {
        Some("latin1" | "latin-1" | "iso-8859-1" | "iso8859-1") => latin1(raw),
        _ => match std::str::from_utf8(raw) {
            Ok(text) => text.to_string(),
            Err(_) => latin1(raw),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snmp::backend::StoredWalkBackend;
    use crate::snmp::tree::BackendOidSpec;
    use crate::types::HostName;

    const WALK: &str = "\
.1.3.6.1.2.1.2.2.1.2.1 lo
.1.3.6.1.2.1.2.2.1.2.2 eth0
.1.3.6.1.2.1.2.2.1.2.10 eth1
.1.3.6.1.2.1.2.2.1.5.1 10000000
.1.3.6.1.2.1.2.2.1.5.10 1000000000
";

    #[test]
    fn joins_columns_on_index_with_end_marker() {
        let mut backend = StoredWalkBackend::from_lines(HostName::new("h"), WALK);
        let tree = BackendSnmpTree::new(
            ".1.3.6.1.2.1.2.2.1",
            vec![BackendOidSpec::end(), BackendOidSpec::column("2"), BackendOidSpec::column("5")],
        );
        let table = get_snmp_table(&tree, &mut WalkCache::in_memory(), &mut backend, None).unwrap();
        let t = |s: &str| SnmpValue::text(s);
        assert_eq!(
            table,
            vec![
                vec![t("1"), t("lo"), t("10000000")],
                vec![t("2"), t("eth0"), t("")],
                vec![t("10"), t("eth1"), t("1000000000")],
            ]
        );
    }

    #[test]
    fn empty_walks_give_an_empty_table() {
        let mut backend = StoredWalkBackend::from_lines(HostName::new("h"), WALK);
        let tree = BackendSnmpTree::new(".1.3.6.1.4.1.9999", vec![BackendOidSpec::end(), BackendOidSpec::column("1")]);
        assert!(get_snmp_table(&tree, &mut WalkCache::in_memory(), &mut backend, None).unwrap().is_empty());
    }

    #[test]
    fn latin1_columns_are_decoded() {
        assert_eq!(decode_text(&[0x4d, 0xfc, 0x6c, 0x6c], Some("latin1")), "Müll");
        assert_eq!(decode_text("Müll".as_bytes(), None), "Müll");
    }
}
