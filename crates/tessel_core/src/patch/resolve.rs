use super::PatchHeader;
use std::collections::BTreeMap;

/// Rewrite `headers` so no two runs touch the same destination dword while
/// producing the same result as applying them in order.
///
/// Workgroups of one dispatch run in no particular order, so overlapping
/// runs would race. Returns `None` when the stream is already disjoint.
pub(crate) fn resolve_overlaps(headers: &[PatchHeader]) -> Option<Vec<PatchHeader>> {
    if !has_overlap(headers) {
        return None;
    }

    // Merged destination intervals already claimed by later headers
    let mut covered: BTreeMap<u64, u64> = BTreeMap::new();
    let mut resolved = Vec::with_capacity(headers.len());

    for header in headers.iter().rev() {
        let start = header.dst_dword_offset() as u64;
        let end = start + header.dword_count() as u64;

        let mut touching: Vec<(u64, u64)> = covered
            .range(..end)
            .rev()
            .take_while(|&(_, &e)| e > start)
            .map(|(&s, &e)| (s, e))
            .collect();
        touching.reverse();

        let mut emit = |from: u64, to: u64| {
            let src = header.src_dword_offset() as u64 + (from - start);
            resolved.push(PatchHeader::new((to - from) as u32, src as u32, from as u32));
        };
        let mut cursor = start;
        for &(s, e) in &touching {
            if s > cursor {
                emit(cursor, s);
            }
            cursor = cursor.max(e);
        }
        if cursor < end {
            emit(cursor, end);
        }

        let merged_start = touching.first().map_or(start, |&(s, _)| s.min(start));
        let merged_end = touching.last().map_or(end, |&(_, e)| e.max(end));
        for (s, _) in &touching {
            covered.remove(s);
        }
        covered.insert(merged_start, merged_end);
    }

    resolved.reverse();
    Some(resolved)
}

fn has_overlap(headers: &[PatchHeader]) -> bool {
    let mut spans: Vec<(u64, u64)> = headers
        .iter()
        .map(|h| {
            let start = h.dst_dword_offset() as u64;
            (start, start + h.dword_count() as u64)
        })
        .collect();
    spans.sort_unstable();
    let mut reach = 0;
    for (i, &(start, end)) in spans.iter().enumerate() {
        if i > 0 && start < reach {
            return true;
        }
        reach = reach.max(end);
    }
    false
}
