//! HID report-descriptor capability scan
//!
//! Computes the per-kind report wire lengths and the top-level usage from a
//! raw report descriptor, the information the Windows host stack hands out
//! via `HidP_GetCaps`. Only the items that affect report sizing are
//! interpreted; everything else is skipped by length.

use std::collections::HashMap;

use crate::types::{DeviceCapabilities, ReportKind};

/// Result of a descriptor scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLayout {
    pub capabilities: DeviceCapabilities,
    /// True when the descriptor declares report IDs. Devices without them
    /// exchange bare payloads on the wire; the session layer still models a
    /// report-ID byte of 0 in front.
    pub numbered: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct GlobalState {
    usage_page: u16,
    report_size: u32,
    report_count: u32,
    report_id: u8,
}

/// Scan a report descriptor.
///
/// Report lengths follow the HIDP_CAPS convention: the byte length includes
/// the report-ID byte, and is the maximum over all report IDs of that kind.
pub fn scan(desc: &[u8]) -> ReportLayout {
    let mut globals = GlobalState::default();
    let mut stack: Vec<GlobalState> = Vec::new();
    // bits per (kind, report id)
    let mut bits: HashMap<(ReportKind, u8), u32> = HashMap::new();
    let mut numbered = false;
    let mut depth = 0u32;
    let mut top_usage: Option<(u16, u16)> = None;

    let mut i = 0;
    while i < desc.len() {
        let prefix = desc[i];
        i += 1;

        // Long item: skip by its declared size.
        if prefix == 0xFE {
            if i + 1 >= desc.len() {
                break;
            }
            let size = desc[i] as usize;
            i += 2 + size;
            continue;
        }

        let size = match prefix & 0x03 {
            3 => 4,
            n => n as usize,
        };
        if i + size > desc.len() {
            break;
        }
        let mut data = 0u32;
        for (shift, &byte) in desc[i..i + size].iter().enumerate() {
            data |= u32::from(byte) << (8 * shift);
        }
        i += size;

        let item_type = (prefix >> 2) & 0x03;
        let tag = prefix >> 4;
        match (item_type, tag) {
            // Main items: accumulate field bits per report ID.
            (0, 0x8) => add_bits(&mut bits, ReportKind::Input, &globals),
            (0, 0x9) => add_bits(&mut bits, ReportKind::Output, &globals),
            (0, 0xB) => add_bits(&mut bits, ReportKind::Feature, &globals),
            (0, 0xA) => depth += 1,
            (0, 0xC) => depth = depth.saturating_sub(1),
            // Globals
            (1, 0x0) => globals.usage_page = data as u16,
            (1, 0x7) => globals.report_size = data,
            (1, 0x8) => {
                globals.report_id = data as u8;
                numbered = true;
            }
            (1, 0x9) => globals.report_count = data,
            (1, 0xA) => stack.push(globals),
            (1, 0xB) => {
                if let Some(saved) = stack.pop() {
                    globals = saved;
                }
            }
            // Local usage: the first one at the top level is the device usage.
            (2, 0x0) => {
                if depth == 0 && top_usage.is_none() {
                    top_usage = Some((globals.usage_page, data as u16));
                }
            }
            _ => {}
        }
    }

    let (usage_page, usage) = top_usage.unwrap_or((0, 0));
    ReportLayout {
        capabilities: DeviceCapabilities {
            input_report_len: wire_len(&bits, ReportKind::Input),
            output_report_len: wire_len(&bits, ReportKind::Output),
            feature_report_len: wire_len(&bits, ReportKind::Feature),
            usage_page,
            usage,
        },
        numbered,
    }
}

fn add_bits(bits: &mut HashMap<(ReportKind, u8), u32>, kind: ReportKind, globals: &GlobalState) {
    // Saturate: a corrupt or hostile descriptor can declare absurd sizes,
    // and the device hands us this data on every open.
    let field_bits = globals.report_size.saturating_mul(globals.report_count);
    let entry = bits.entry((kind, globals.report_id)).or_insert(0);
    *entry = entry.saturating_add(field_bits);
}

/// Max byte length over all report IDs of a kind, plus the report-ID byte.
fn wire_len(bits: &HashMap<(ReportKind, u8), u32>, kind: ReportKind) -> u32 {
    bits.iter()
        .filter(|((k, _), _)| *k == kind)
        .map(|(_, &b)| b.div_ceil(8) + 1)
        .max()
        .unwrap_or(0)
}
