use std::env;
use std::sync::Once;

/// Print citation information (only prints once)
pub fn print_citation() {
	static PRINT_CITATION_ONCE: Once = Once::new();
	PRINT_CITATION_ONCE.call_once(|| {
		eprintln!("Citation: F Hoyle & MS Vogeley. ApJ v566: 2002, pp. 641-651.");
		eprintln!("DOI: http://dx.doi.org/10.1086/338340\n");
	});
}

/// Print compilation information (only prints once)
pub fn print_compile_info() {
	static PRINT_COMPILE_ONCE: Once = Once::new();
	PRINT_COMPILE_ONCE.call_once(|| {
		eprintln!("Program: {}", program_name());
		eprintln!("Compiled on: {} at {}", env!("COMPILE_DATE"), env!("COMPILE_TIME"));
		eprintln!("Version: {}", env!("CARGO_PKG_VERSION"));
	});
}

/// File name of the running binary, falling back to the package name.
fn program_name() -> String {
	env::current_exe()
		.ok()
		.and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
		.unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}
