/// Options that control how a transcription run is performed.
///
/// This struct represents *library-level configuration*, not CLI flags or form fields
/// directly. The server and CLI are responsible for mapping user input into this type
/// so that:
/// - the library remains reusable outside of an HTTP context
/// - other frontends (tests, batch jobs) can construct options programmatically
#[derive(Debug, Clone, Default)]
pub struct TranscribeOpts {
    /// Optional language hint (e.g. `"en"`, `"es"`), forwarded to the engine as
    /// `--language <code>`.
    ///
    /// When `None`, the engine is left to auto-detect the spoken language.
    pub language: Option<String>,

    /// Optional engine model name (e.g. `"base"`, `"large-v3"`), forwarded to the engine
    /// as `--model <name>`.
    pub model: Option<String>,
}
