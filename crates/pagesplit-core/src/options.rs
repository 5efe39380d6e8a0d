//! Parse configuration shared by the splitter and the raster pass

/// How tolerant the loader is of non-conformant files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Header at offset 0, `%%EOF` present, every referenced object must exist
    Strict,
    /// Skips junk before the header, tolerates a missing `%%EOF` or trailer
    /// `/Root`, and nulls out dangling references
    Lenient,
}

/// Options for loading and re-serializing documents.
///
/// No `Default`: callers pick a [`ParseMode`] explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOptions {
    pub parse_mode: ParseMode,
    /// Flate-compress uncompressed streams in the output documents
    pub compress: bool,
}

impl SplitOptions {
    pub fn strict() -> Self {
        Self {
            parse_mode: ParseMode::Strict,
            compress: true,
        }
    }

    pub fn lenient() -> Self {
        Self {
            parse_mode: ParseMode::Lenient,
            compress: true,
        }
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn is_lenient(&self) -> bool {
        self.parse_mode == ParseMode::Lenient
    }
}
