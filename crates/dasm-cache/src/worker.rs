use std::fmt::Write as _;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use iced_x86::{Decoder, DecoderOptions, Formatter, GasFormatter, Instruction, IntelFormatter, OpKind};

use dasm_services::{ContentHash, DebugInfo, HashStore};

use crate::chunklist::InstChunkList;
use crate::ring::WorkOrder;
use crate::types::{Arch, Info, Inst, Params, StyleFlags, Syntax};
use crate::{Services, Shared};

/// Trailing tag mixed into every listing's text key.
const TEXT_KEY_TAG: u64 = 0x4d53_4144;

/// A listing under construction: instruction records plus one rendered
/// text line per record, joined with `"\n"` at publication.
#[derive(Default)]
pub(crate) struct Listing {
    pub insts: InstChunkList,
    pub strings: Vec<String>,
    text_len: u32,
}

impl Listing {
    /// Appends an annotation line. Pseudo-instructions keep a zeroed
    /// record; their text still occupies a line in the blob.
    fn push_pseudo(&mut self, text: String) {
        self.insts.push(Inst::default());
        self.text_len += text.len() as u32;
        self.strings.push(text);
    }

    fn push_inst(&mut self, code_off: u64, jump_dst_vaddr: u64, text: String) {
        let start = self.text_len + self.strings.len() as u32;
        let end = start + text.len() as u32;
        self.insts.push(Inst {
            code_off,
            jump_dst_vaddr,
            text_range: start..end,
        });
        self.text_len += text.len() as u32;
        self.strings.push(text);
    }
}

/// Decodes `data` into an annotated listing.
///
/// A decode failure at any offset truncates the stream there; a missing
/// debug-info parse or source text degrades to fewer annotations. Nothing
/// here fails the caller.
pub(crate) fn decode_listing(
    params: &Params,
    data: &[u8],
    rdi: Option<&Arc<DebugInfo>>,
    services: &Services,
    line_text_patience: Duration,
) -> Listing {
    let mut listing = Listing::default();
    // adding an architecture means wiring a decoder up here
    match params.arch {
        Arch::X86 | Arch::X64 => {}
    }

    let mut decoder = Decoder::with_ip(
        params.arch.bit_size(),
        data,
        params.vaddr,
        DecoderOptions::NONE,
    );
    let mut formatter = ListingFormatter::new(params.syntax);

    let mut last_file: Option<u32> = None;
    let mut last_line: Option<(u32, u32)> = None;
    let mut asm = String::new();

    while decoder.can_decode() {
        let inst = decoder.decode();
        if inst.is_invalid() {
            break;
        }
        let off = inst.ip() - params.vaddr;
        let size = inst.len();
        let jump_dst_vaddr = match inst.op0_kind() {
            OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => {
                inst.near_branch_target()
            }
            _ => 0,
        };

        // Source annotations precede the instruction they describe.
        if params
            .style_flags
            .intersects(StyleFlags::SOURCE_FILE_NAMES | StyleFlags::SOURCE_LINES)
        {
            if let Some(rdi) = rdi {
                let voff = (params.vaddr + off).wrapping_sub(params.base_vaddr);
                if let Some(line) = rdi.line_for_voff(voff) {
                    let path = rdi.file_path(line.file_idx);
                    if last_file != Some(line.file_idx) {
                        if params.style_flags.contains(StyleFlags::SOURCE_FILE_NAMES) {
                            if path.is_empty() {
                                listing.push_pseudo(">".to_string());
                            } else {
                                listing.push_pseudo(format!("> {path}"));
                            }
                        }
                        last_file = Some(line.file_idx);
                    }
                    let line_id = (line.unit_idx, line.line_idx);
                    if last_line != Some(line_id)
                        && params.style_flags.contains(StyleFlags::SOURCE_LINES)
                        && !path.is_empty()
                    {
                        if services.watcher.file_modified_us(path) != 0 {
                            if let Some(text) =
                                fetch_line_text(services, path, line.line_num, line_text_patience)
                            {
                                listing.push_pseudo(format!("> {text}"));
                            }
                        }
                        last_line = Some(line_id);
                    }
                }
            }
        }

        let mut text = String::new();
        if params.style_flags.contains(StyleFlags::ADDRESSES) {
            let indent = if rdi.is_some() { "    " } else { "  " };
            write!(text, "{indent}{:016X}  ", params.vaddr + off).unwrap();
        }
        if params.style_flags.contains(StyleFlags::CODE_BYTES) {
            text.push('{');
            for byte_idx in 0..size.max(16) {
                if byte_idx < size {
                    write!(text, "{:02x}", data[off as usize + byte_idx]).unwrap();
                    if byte_idx == size - 1 {
                        text.push('}');
                    }
                    text.push(' ');
                } else if byte_idx < 8 {
                    text.push_str("   ");
                }
            }
            text.push(' ');
        }
        asm.clear();
        formatter.format(&inst, &mut asm);
        text.push_str(&asm);
        if jump_dst_vaddr != 0 && params.style_flags.contains(StyleFlags::SYMBOL_NAMES) {
            if let Some(rdi) = rdi {
                if let Some(name) =
                    rdi.procedure_for_voff(jump_dst_vaddr.wrapping_sub(params.base_vaddr))
                {
                    write!(text, " ({name})").unwrap();
                }
            }
        }
        listing.push_inst(off, jump_dst_vaddr, text);
    }
    listing
}

/// Renders mnemonic/operand text in the requested syntax.
enum ListingFormatter {
    Intel(IntelFormatter),
    Att(GasFormatter),
}

impl ListingFormatter {
    fn new(syntax: Syntax) -> Self {
        match syntax {
            Syntax::Intel => ListingFormatter::Intel(IntelFormatter::new()),
            Syntax::Att => ListingFormatter::Att(GasFormatter::new()),
        }
    }

    fn format(&mut self, inst: &Instruction, output: &mut String) {
        match self {
            ListingFormatter::Intel(formatter) => formatter.format(inst, output),
            ListingFormatter::Att(formatter) => formatter.format(inst, output),
        }
    }
}

/// Resolves one source line's text, polling the text service until it has
/// tokenized the file or `patience` runs out.
fn fetch_line_text(
    services: &Services,
    path: &str,
    line_num: u32,
    patience: Duration,
) -> Option<String> {
    let key = services.text.fs_key_from_path(path);
    let lang = services.text.lang_kind_from_extension(path);
    let deadline = Instant::now() + patience;
    let (text_hash, text_info) = loop {
        if let Some(found) = services.text.text_info_from_key_lang(key, lang) {
            if !found.0.is_zero() {
                break found;
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::yield_now();
    };

    let range = text_info.line_range(line_num as u64)?;
    let blob = services.hash_store.data_from_hash(text_hash)?;
    let start = (range.start as usize).min(blob.len());
    let end = (range.end as usize).min(blob.len()).max(start);
    let text = String::from_utf8_lossy(&blob[start..end]).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Derives the stable hash-store key a listing's text is submitted under.
fn text_key_for(
    store: &dyn HashStore,
    hash: ContentHash,
    params: &Params,
    rdi: Option<&DebugInfo>,
) -> ContentHash {
    let mut lo = [0; 8];
    lo.copy_from_slice(&hash.0[..8]);
    let words = [
        u64::from_le_bytes(lo),
        hash.hi(),
        params.vaddr,
        params.arch.to_u32() as u64,
        params.style_flags.bits() as u64,
        params.syntax.to_u32() as u64,
        rdi.map(DebugInfo::identity).unwrap_or(0),
        TEXT_KEY_TAG,
    ];
    let mut buf = Vec::with_capacity(words.len() * 8);
    for word in words {
        buf.extend_from_slice(&word.to_le_bytes());
    }
    store.hash_from_data(&buf)
}

/// The worker thread body: drain the queue forever.
pub(crate) fn run(shared: Arc<Shared>) {
    loop {
        let WorkOrder { hash, params } = shared.queue.dequeue();
        process_order(&shared, hash, params);
    }
}

fn process_order(shared: &Shared, hash: ContentHash, params: Params) {
    let change_gen = shared.services.watcher.change_gen();
    let (stripe, local_slot) = shared.index.stripe_for_hash(hash);

    // Claim the node. Losing the race means another worker already owns
    // this identity; the duplicate order is dropped.
    let got_task = {
        let state = stripe.state.read();
        match state.find(local_slot, hash, &params) {
            Some(idx) => state
                .node(idx)
                .is_working
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok(),
            None => false,
        }
    };
    if !got_task {
        tracing::trace!(%hash, "skipping work order for claimed or evicted node");
        return;
    }

    let rdi = if params.dbgi_key.path.is_empty() {
        None
    } else {
        shared
            .services
            .debug_info
            .rdi_from_key(&params.dbgi_key, None)
    };
    let data = shared.services.hash_store.data_from_hash(hash);
    let bytes = data.as_deref().unwrap_or(&[]);

    let Listing { insts, strings, .. } = decode_listing(
        &params,
        bytes,
        rdi.as_ref(),
        &shared.services,
        shared.config.line_text_patience,
    );

    let text = strings.join("\n");
    let text_key = text_key_for(
        shared.services.hash_store.as_ref(),
        hash,
        &params,
        rdi.as_deref(),
    );
    shared
        .services
        .hash_store
        .submit_data(text_key, text.into_bytes());

    let info = Info {
        text_key,
        insts: Arc::new(insts.into_array()),
    };
    let annotated = rdi.is_some()
        && params
            .style_flags
            .intersects(StyleFlags::SOURCE_FILE_NAMES | StyleFlags::SOURCE_LINES);

    tracing::debug!(
        %hash,
        vaddr = params.vaddr,
        insts = info.insts.len(),
        "publishing decoded listing"
    );

    let mut state = stripe.state.write();
    // The node may have been evicted while we were decoding; never create
    // one here.
    if let Some(idx) = state.find(local_slot, hash, &params) {
        let node = state.node_mut(idx);
        node.info = Some(info);
        node.change_gen = if annotated { change_gen } else { 0 };
        node.is_working.store(false, Ordering::SeqCst);
        node.load_count.fetch_add(1, Ordering::SeqCst);
    }
}
