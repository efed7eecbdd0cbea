//! In-memory ELF and Mach-O images for tests.

#[derive(Default)]
struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn with_len(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
        }
    }

    fn pad_to(&mut self, len: usize) {
        if self.bytes.len() < len {
            self.bytes.resize(len, 0);
        }
    }

    fn align(&mut self, to: usize) {
        let len = self.bytes.len().next_multiple_of(to);
        self.pad_to(len);
    }

    fn put(&mut self, offset: usize, data: &[u8]) {
        self.pad_to(offset + data.len());
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    fn u16(&mut self, offset: usize, v: u16) {
        self.put(offset, &v.to_le_bytes());
    }

    fn u32(&mut self, offset: usize, v: u32) {
        self.put(offset, &v.to_le_bytes());
    }

    fn u64(&mut self, offset: usize, v: u64) {
        self.put(offset, &v.to_le_bytes());
    }

    fn append(&mut self, data: &[u8]) -> usize {
        let at = self.bytes.len();
        self.bytes.extend_from_slice(data);
        at
    }
}

struct FixtureSymbol {
    name: String,
    value: u64,
    defined: bool,
}

/// Builds the string table; returns it with per-symbol name offsets.
fn string_table(symbols: &[FixtureSymbol]) -> (Vec<u8>, Vec<u32>) {
    let mut strings = vec![0u8];
    let mut offsets = Vec::with_capacity(symbols.len());
    for sym in symbols {
        offsets.push(strings.len() as u32);
        strings.extend_from_slice(sym.name.as_bytes());
        strings.push(0);
    }
    (strings, offsets)
}

pub struct ElfFixture {
    symbols: Vec<FixtureSymbol>,
    segments: Vec<u64>,
    stripped: bool,
    exports_only: bool,
}

impl ElfFixture {
    pub fn new() -> Self {
        Self {
            symbols: Vec::new(),
            segments: Vec::new(),
            stripped: false,
            exports_only: false,
        }
    }

    pub fn symbol(mut self, name: &str, value: u64) -> Self {
        self.symbols.push(FixtureSymbol {
            name: name.to_string(),
            value,
            defined: true,
        });
        self
    }

    pub fn undefined(mut self, name: &str) -> Self {
        self.symbols.push(FixtureSymbol {
            name: name.to_string(),
            value: 0,
            defined: false,
        });
        self
    }

    pub fn load_segment(mut self, vaddr: u64) -> Self {
        self.segments.push(vaddr);
        self
    }

    pub fn stripped(mut self) -> Self {
        self.stripped = true;
        self
    }

    /// Emit the symbols as `.dynsym` instead of `.symtab`.
    pub fn exports_only(mut self) -> Self {
        self.exports_only = true;
        self
    }

    fn table_type(&self) -> u32 {
        if self.exports_only { 11 } else { 2 }
    }

    fn segments(&self) -> Vec<u64> {
        if self.segments.is_empty() {
            vec![0]
        } else {
            self.segments.clone()
        }
    }

    pub fn build64(&self) -> Vec<u8> {
        let segments = self.segments();
        let mut w = Writer::with_len(64);
        w.put(0, b"\x7fELF");
        w.put(4, &[2, 1, 1]);
        w.u16(16, 3);
        w.u16(52, 64);

        let phoff = w.bytes.len();
        for vaddr in &segments {
            let at = w.bytes.len();
            w.pad_to(at + 56);
            w.u32(at, 1);
            w.u64(at + 16, *vaddr);
        }

        let (strings, name_offsets) = string_table(&self.symbols);
        let stroff = w.append(&strings);
        w.align(8);

        let symoff = w.bytes.len();
        w.pad_to(symoff + 24);
        for (sym, name) in self.symbols.iter().zip(&name_offsets) {
            let at = w.bytes.len();
            w.pad_to(at + 24);
            w.u32(at, *name);
            w.put(at + 4, &[0x12]);
            w.u16(at + 6, if sym.defined { 1 } else { 0 });
            w.u64(at + 8, sym.value);
        }
        let symsize = w.bytes.len() - symoff;

        let shoff = w.bytes.len();
        let mut shnum = 1;
        if !self.stripped {
            let at = shoff + 64 * shnum;
            w.pad_to(at + 64);
            w.u32(at + 4, self.table_type());
            w.u64(at + 24, symoff as u64);
            w.u64(at + 32, symsize as u64);
            w.u32(at + 40, (shnum + 1) as u32);
            w.u64(at + 56, 24);
            shnum += 1;
        }
        let at = shoff + 64 * shnum;
        w.pad_to(at + 64);
        w.u32(at + 4, 3);
        w.u64(at + 24, stroff as u64);
        w.u64(at + 32, strings.len() as u64);
        shnum += 1;
        w.pad_to(shoff + 64 * shnum);

        w.u64(32, phoff as u64);
        w.u64(40, shoff as u64);
        w.u16(54, 56);
        w.u16(56, segments.len() as u16);
        w.u16(58, 64);
        w.u16(60, shnum as u16);
        w.bytes
    }

    pub fn build32(&self) -> Vec<u8> {
        let segments = self.segments();
        let mut w = Writer::with_len(52);
        w.put(0, b"\x7fELF");
        w.put(4, &[1, 1, 1]);
        w.u16(16, 3);
        w.u16(40, 52);

        let phoff = w.bytes.len();
        for vaddr in &segments {
            let at = w.bytes.len();
            w.pad_to(at + 32);
            w.u32(at, 1);
            w.u32(at + 8, *vaddr as u32);
        }

        let (strings, name_offsets) = string_table(&self.symbols);
        let stroff = w.append(&strings);
        w.align(4);

        let symoff = w.bytes.len();
        w.pad_to(symoff + 16);
        for (sym, name) in self.symbols.iter().zip(&name_offsets) {
            let at = w.bytes.len();
            w.pad_to(at + 16);
            w.u32(at, *name);
            w.u32(at + 4, sym.value as u32);
            w.put(at + 12, &[0x12]);
            w.u16(at + 14, if sym.defined { 1 } else { 0 });
        }
        let symsize = w.bytes.len() - symoff;

        let shoff = w.bytes.len();
        let mut shnum = 1;
        if !self.stripped {
            let at = shoff + 40 * shnum;
            w.pad_to(at + 40);
            w.u32(at + 4, self.table_type());
            w.u32(at + 16, symoff as u32);
            w.u32(at + 20, symsize as u32);
            w.u32(at + 24, (shnum + 1) as u32);
            w.u32(at + 36, 16);
            shnum += 1;
        }
        let at = shoff + 40 * shnum;
        w.pad_to(at + 40);
        w.u32(at + 4, 3);
        w.u32(at + 16, stroff as u32);
        w.u32(at + 20, strings.len() as u32);
        shnum += 1;
        w.pad_to(shoff + 40 * shnum);

        w.u32(28, phoff as u32);
        w.u32(32, shoff as u32);
        w.u16(42, 32);
        w.u16(44, segments.len() as u16);
        w.u16(46, 40);
        w.u16(48, shnum as u16);
        w.bytes
    }
}

/// Mapped Mach-O dylib: `__TEXT` at vmaddr 0 covering the first page and
/// `__LINKEDIT` at [`MachOFixture::LINKEDIT_VMADDR`], whose file offset
/// differs so the file-to-memory translation is exercised.
pub struct MachOFixture {
    symbols: Vec<FixtureSymbol>,
    linkedit: bool,
}

impl MachOFixture {
    pub const LINKEDIT_VMADDR: u64 = 0x1000;
    pub const LINKEDIT_FILEOFF: u64 = 0x800;

    pub fn new() -> Self {
        Self {
            symbols: Vec::new(),
            linkedit: true,
        }
    }

    pub fn symbol(mut self, name: &str, value: u64) -> Self {
        self.symbols.push(FixtureSymbol {
            name: name.to_string(),
            value,
            defined: true,
        });
        self
    }

    pub fn undefined(mut self, name: &str) -> Self {
        self.symbols.push(FixtureSymbol {
            name: name.to_string(),
            value: 0,
            defined: false,
        });
        self
    }

    pub fn without_linkedit(mut self) -> Self {
        self.linkedit = false;
        self
    }

    pub fn build64(&self) -> Vec<u8> {
        self.build(true)
    }

    pub fn build32(&self) -> Vec<u8> {
        self.build(false)
    }

    fn build(&self, is_64: bool) -> Vec<u8> {
        let header_size = if is_64 { 32 } else { 28 };
        let segment_size = if is_64 { 72 } else { 56 };
        let entry_size = if is_64 { 16 } else { 12 };

        // __LINKEDIT contents: symbol array, then strings
        let (strings, name_offsets) = string_table(&self.symbols);
        let mut linkedit = Writer::default();
        for (sym, name) in self.symbols.iter().zip(&name_offsets) {
            let at = linkedit.bytes.len();
            linkedit.pad_to(at + entry_size);
            linkedit.u32(at, *name);
            linkedit.put(at + 4, &[0x0f, if sym.defined { 1 } else { 0 }]);
            if is_64 {
                linkedit.u64(at + 8, sym.value);
            } else {
                linkedit.u32(at + 8, sym.value as u32);
            }
        }
        let symbols_size = linkedit.bytes.len();
        linkedit.append(&strings);
        let linkedit_size = linkedit.bytes.len() as u64;

        let mut w = Writer::with_len(header_size);
        w.put(0, if is_64 { &[0xcf, 0xfa, 0xed, 0xfe] } else { &[0xce, 0xfa, 0xed, 0xfe] });
        w.u32(12, 6);

        let mut ncmds = 0;
        let segment = |w: &mut Writer, name: &[u8], vmaddr: u64, vmsize: u64, fileoff: u64| {
            let at = w.bytes.len();
            w.pad_to(at + segment_size);
            w.u32(at, if is_64 { 0x19 } else { 0x1 });
            w.u32(at + 4, segment_size as u32);
            w.put(at + 8, name);
            if is_64 {
                w.u64(at + 24, vmaddr);
                w.u64(at + 32, vmsize);
                w.u64(at + 40, fileoff);
                w.u64(at + 48, vmsize);
            } else {
                w.u32(at + 24, vmaddr as u32);
                w.u32(at + 28, vmsize as u32);
                w.u32(at + 32, fileoff as u32);
                w.u32(at + 36, vmsize as u32);
            }
        };

        segment(&mut w, b"__TEXT", 0, Self::LINKEDIT_VMADDR, 0);
        ncmds += 1;
        if self.linkedit {
            segment(
                &mut w,
                b"__LINKEDIT",
                Self::LINKEDIT_VMADDR,
                linkedit_size,
                Self::LINKEDIT_FILEOFF,
            );
            ncmds += 1;
        }

        let at = w.bytes.len();
        w.pad_to(at + 24);
        w.u32(at, 0x2);
        w.u32(at + 4, 24);
        w.u32(at + 8, Self::LINKEDIT_FILEOFF as u32);
        w.u32(at + 12, self.symbols.len() as u32);
        w.u32(at + 16, (Self::LINKEDIT_FILEOFF as usize + symbols_size) as u32);
        w.u32(at + 20, strings.len() as u32);
        ncmds += 1;

        let sizeofcmds = w.bytes.len() - header_size;
        w.u32(16, ncmds);
        w.u32(20, sizeofcmds as u32);

        w.pad_to(Self::LINKEDIT_VMADDR as usize);
        w.append(&linkedit.bytes);
        w.bytes
    }
}
