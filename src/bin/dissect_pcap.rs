use anyhow::Context;
use pcap_parser::pcapng::Block as PcapNgBlock;
use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{Linktype, PcapBlockOwned, PcapError};
use protodissect::dump::tree_to_dump;
use protodissect::value::FieldStatus;
use protodissect::{DecodedTree, Dissector, SchemaRegistry, SchemaSource};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Default)]
struct Stats {
    packets: u64,
    udp_payloads: u64,
    clean: u64,
    with_unknown: u64,
    with_malformed: u64,
    truncated: u64,
}

fn usage() -> ! {
    eprintln!("usage: dissect_pcap <capture.pcap> <schema dir or .proto file> [options]");
    eprintln!("  --type=NAME   root message type (fully-qualified or unique suffix)");
    eprintln!("  --frame=N     dump only packet N");
    eprintln!("  --dump[=FILE] write per-packet decoded trees (default stdout)");
    eprintln!("  --verbose     note undissectable payloads on stderr");
    std::process::exit(2);
}

fn main() -> anyhow::Result<()> {
    let mut raw_args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = if let Some(pos) = raw_args.iter().position(|a| a == "--verbose" || a == "-v") {
        raw_args.remove(pos);
        true
    } else {
        false
    };
    let dump_path: Option<PathBuf> = raw_args
        .iter()
        .position(|a| a.starts_with("--dump"))
        .and_then(|pos| {
            let arg = raw_args.remove(pos);
            if arg == "--dump" {
                Some(PathBuf::from("-"))
            } else {
                arg.strip_prefix("--dump=").map(PathBuf::from)
            }
        });
    let frame_filter: Option<u64> = raw_args
        .iter()
        .position(|a| a.starts_with("--frame="))
        .and_then(|pos| {
            let arg = raw_args.remove(pos);
            arg.strip_prefix("--frame=").and_then(|s| s.parse().ok())
        });
    let root_type: Option<String> = raw_args
        .iter()
        .position(|a| a.starts_with("--type="))
        .map(|pos| {
            let arg = raw_args.remove(pos);
            arg.trim_start_matches("--type=").to_string()
        });
    let mut args = raw_args.into_iter();
    let pcap_path: PathBuf = match args.next() {
        Some(p) => PathBuf::from(p),
        None => usage(),
    };
    let schema_path: PathBuf = match args.next() {
        Some(p) => PathBuf::from(p),
        None => usage(),
    };

    let sources = collect_schema_sources(&schema_path)?;
    let (registry, diagnostics) = SchemaRegistry::load(&sources);
    for d in &diagnostics {
        eprintln!("schema: {}", d);
    }
    if registry.is_empty() && !sources.is_empty() {
        eprintln!("warning: no usable message types, decoding schema-free");
    }
    let dissector = Dissector::new(&registry);

    let mut dump_writer: Option<Box<dyn Write>> = match dump_path.as_ref() {
        Some(p) if p.as_os_str() == "-" => Some(Box::new(std::io::stdout())),
        Some(p) => Some(Box::new(File::create(p)?)),
        None => None,
    };

    let mut stats = Stats::default();

    // Probe file type (pcap vs pcapng) using the magic at start of file.
    let mut probe = [0u8; 4];
    {
        let mut f = File::open(&pcap_path)
            .with_context(|| format!("open {}", pcap_path.display()))?;
        f.read_exact(&mut probe)
            .with_context(|| format!("read {}", pcap_path.display()))?;
    }
    let is_pcapng = probe == [0x0a, 0x0d, 0x0d, 0x0a];
    let file = File::open(&pcap_path)?;
    if is_pcapng {
        run_pcapng(
            file,
            &dissector,
            root_type.as_deref(),
            verbose,
            &mut dump_writer,
            frame_filter,
            &mut stats,
        )?;
    } else {
        run_legacy_pcap(
            file,
            &dissector,
            root_type.as_deref(),
            verbose,
            &mut dump_writer,
            frame_filter,
            &mut stats,
        )?;
    }

    eprintln!("pcap:   {}", pcap_path.display());
    eprintln!("schema: {}", schema_path.display());
    if let Some(t) = &root_type {
        eprintln!("type:   {}", t);
    }
    eprintln!("packets: {}", stats.packets);
    eprintln!("udp payloads: {}", stats.udp_payloads);
    eprintln!("clean: {}", stats.clean);
    eprintln!("with unknown fields: {}", stats.with_unknown);
    eprintln!("with malformed fields: {}", stats.with_malformed);
    eprintln!("truncated: {}", stats.truncated);

    Ok(())
}

/// Gather `.proto` sources: a single file, or a non-recursive directory scan.
fn collect_schema_sources(path: &Path) -> anyhow::Result<Vec<SchemaSource>> {
    let mut sources = Vec::new();
    if path.is_dir() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "proto").unwrap_or(false))
            .collect();
        entries.sort();
        for p in entries {
            sources.push(
                SchemaSource::read(&p).with_context(|| format!("read {}", p.display()))?,
            );
        }
    } else {
        sources.push(
            SchemaSource::read(path).with_context(|| format!("read {}", path.display()))?,
        );
    }
    Ok(sources)
}

fn run_legacy_pcap<R: Read>(
    file: R,
    dissector: &Dissector<'_>,
    root_type: Option<&str>,
    verbose: bool,
    dump: &mut Option<Box<dyn Write>>,
    frame_filter: Option<u64>,
    stats: &mut Stats,
) -> anyhow::Result<()> {
    let mut reader = pcap_parser::pcap::LegacyPcapReader::new(1 << 20, file)?;
    let mut linktype: Option<Linktype> = None;
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                match block {
                    PcapBlockOwned::LegacyHeader(h) => linktype = Some(h.network),
                    PcapBlockOwned::Legacy(b) => {
                        stats.packets += 1;
                        let lt = linktype.unwrap_or(Linktype(1));
                        if let Some(payload) = udp_payload_from_linktype(lt, b.data) {
                            stats.udp_payloads += 1;
                            process_udp_payload(
                                dissector,
                                root_type,
                                payload,
                                stats.packets,
                                verbose,
                                dump,
                                frame_filter,
                                stats,
                            );
                        }
                    }
                    PcapBlockOwned::NG(_) => {}
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| anyhow::anyhow!("pcap refill error: {:?}", e))?;
            }
            Err(e) => return Err(anyhow::anyhow!("pcap read error: {:?}", e)),
        }
    }
    Ok(())
}

fn run_pcapng<R: Read>(
    file: R,
    dissector: &Dissector<'_>,
    root_type: Option<&str>,
    verbose: bool,
    dump: &mut Option<Box<dyn Write>>,
    frame_filter: Option<u64>,
    stats: &mut Stats,
) -> anyhow::Result<()> {
    let mut reader = pcap_parser::pcapng::PcapNGReader::new(1 << 20, file)?;
    let mut if_linktypes: Vec<Linktype> = Vec::new();
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                if let PcapBlockOwned::NG(b) = block {
                    match &b {
                        PcapNgBlock::InterfaceDescription(idb) => if_linktypes.push(idb.linktype),
                        PcapNgBlock::EnhancedPacket(epb) => {
                            stats.packets += 1;
                            let lt = if_linktypes
                                .get(epb.if_id as usize)
                                .copied()
                                .unwrap_or(Linktype(1));
                            if let Some(payload) = udp_payload_from_linktype(lt, epb.packet_data())
                            {
                                stats.udp_payloads += 1;
                                process_udp_payload(
                                    dissector,
                                    root_type,
                                    payload,
                                    stats.packets,
                                    verbose,
                                    dump,
                                    frame_filter,
                                    stats,
                                );
                            }
                        }
                        PcapNgBlock::SimplePacket(spb) => {
                            stats.packets += 1;
                            let lt = if_linktypes.first().copied().unwrap_or(Linktype(1));
                            if let Some(payload) = udp_payload_from_linktype(lt, spb.packet_data())
                            {
                                stats.udp_payloads += 1;
                                process_udp_payload(
                                    dissector,
                                    root_type,
                                    payload,
                                    stats.packets,
                                    verbose,
                                    dump,
                                    frame_filter,
                                    stats,
                                );
                            }
                        }
                        _ => {}
                    }
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| anyhow::anyhow!("pcapng refill error: {:?}", e))?;
            }
            Err(e) => return Err(anyhow::anyhow!("pcapng read error: {:?}", e)),
        }
    }
    Ok(())
}

fn process_udp_payload(
    dissector: &Dissector<'_>,
    root_type: Option<&str>,
    payload: &[u8],
    packet_index: u64,
    verbose: bool,
    dump: &mut Option<Box<dyn Write>>,
    frame_filter: Option<u64>,
    stats: &mut Stats,
) {
    let tree = dissector.dissect(payload, root_type);
    classify(&tree, stats);
    if verbose && tree.fields.is_empty() && !payload.is_empty() {
        let show = payload.len().min(16);
        eprintln!(
            "note: packet {} payload yielded no fields (first {} bytes: {:02x?})",
            packet_index,
            show,
            &payload[..show]
        );
    }
    if let Some(w) = dump.as_mut() {
        if frame_filter.map(|f| f != packet_index).unwrap_or(false) {
            return;
        }
        let _ = writeln!(
            w,
            "=== packet {}  payload {} bytes ===",
            packet_index,
            payload.len()
        );
        let text = tree_to_dump(&tree);
        for line in text.lines() {
            let _ = writeln!(w, "  {}", line);
        }
    }
}

/// Bucket a decoded payload for the end-of-run summary. Severity order:
/// truncated > malformed > unknown > clean.
fn classify(tree: &DecodedTree, stats: &mut Stats) {
    fn scan(tree: &DecodedTree, unknown: &mut bool, malformed: &mut bool, truncated: &mut bool) {
        if tree.truncated.is_some() {
            *truncated = true;
        }
        for f in &tree.fields {
            match &f.status {
                FieldStatus::UnknownField => *unknown = true,
                FieldStatus::Malformed(_) | FieldStatus::MaxDepthExceeded => *malformed = true,
                FieldStatus::Ok => {}
            }
            if let Some(sub) = f.value.as_message() {
                scan(sub, unknown, malformed, truncated);
            }
        }
    }
    let (mut unknown, mut malformed, mut truncated) = (false, false, false);
    scan(tree, &mut unknown, &mut malformed, &mut truncated);
    if truncated {
        stats.truncated += 1;
    } else if malformed {
        stats.with_malformed += 1;
    } else if unknown {
        stats.with_unknown += 1;
    } else {
        stats.clean += 1;
    }
}

/// Extract UDP payload bytes from a captured frame, using linktype and IP
/// length fields. This avoids including Ethernet padding in short frames.
fn udp_payload_from_linktype(linktype: Linktype, frame: &[u8]) -> Option<&[u8]> {
    let l3 = match linktype.0 {
        1 => ethernet_l3(frame)?,    // DLT_EN10MB
        101 => frame,                // DLT_RAW
        113 => linux_sll_l3(frame)?, // DLT_LINUX_SLL
        _ => return None,
    };
    match l3.first()? >> 4 {
        4 => ipv4_udp_payload(l3),
        6 => ipv6_udp_payload(l3),
        _ => None,
    }
}

fn ethernet_l3(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < 14 {
        return None;
    }
    let mut off = 12usize;
    let mut ethertype = u16::from_be_bytes([frame[off], frame[off + 1]]);
    off += 2;
    // VLAN tags (802.1Q / 802.1ad): skip tag (4 bytes) and read next ethertype.
    while ethertype == 0x8100 || ethertype == 0x88a8 {
        if frame.len() < off + 4 + 2 {
            return None;
        }
        off += 4;
        ethertype = u16::from_be_bytes([frame[off], frame[off + 1]]);
        off += 2;
    }
    match ethertype {
        0x0800 | 0x86dd => Some(&frame[off..]), // IPv4 / IPv6
        _ => None,
    }
}

fn linux_sll_l3(frame: &[u8]) -> Option<&[u8]> {
    // Linux cooked capture v1 (SLL): 16-byte header, protocol at bytes 14..16
    if frame.len() < 16 {
        return None;
    }
    let proto = u16::from_be_bytes([frame[14], frame[15]]);
    match proto {
        0x0800 | 0x86dd => Some(&frame[16..]),
        _ => None,
    }
}

fn ipv4_udp_payload(l3: &[u8]) -> Option<&[u8]> {
    if l3.len() < 20 {
        return None;
    }
    let ver_ihl = l3[0];
    if ver_ihl >> 4 != 4 {
        return None;
    }
    let ihl = (ver_ihl & 0x0f) as usize * 4;
    if ihl < 20 || l3.len() < ihl {
        return None;
    }
    let total_len = u16::from_be_bytes([l3[2], l3[3]]) as usize;
    if total_len < ihl {
        return None;
    }
    let l3_trunc = if total_len <= l3.len() { &l3[..total_len] } else { l3 };
    if l3_trunc.len() < ihl + 8 {
        return None;
    }
    if l3_trunc[9] != 17 {
        return None; // not UDP
    }
    udp_payload(&l3_trunc[ihl..])
}

fn ipv6_udp_payload(l3: &[u8]) -> Option<&[u8]> {
    // Fixed 40-byte header; extension-header chains are not walked.
    if l3.len() < 40 || l3[0] >> 4 != 6 {
        return None;
    }
    let payload_len = u16::from_be_bytes([l3[4], l3[5]]) as usize;
    if l3[6] != 17 {
        return None;
    }
    let body = &l3[40..];
    let body = if payload_len <= body.len() { &body[..payload_len] } else { body };
    udp_payload(body)
}

fn udp_payload(udp: &[u8]) -> Option<&[u8]> {
    if udp.len() < 8 {
        return None;
    }
    let udp_len = u16::from_be_bytes([udp[4], udp[5]]) as usize;
    if udp_len < 8 || udp.len() < udp_len {
        return None;
    }
    Some(&udp[8..udp_len])
}
