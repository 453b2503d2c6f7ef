use std::process::Command;

fn date_output(format: &str) -> String {
	Command::new("date")
		.arg(format)
		.output()
		.map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
		.unwrap_or_else(|_| "unknown".to_string())
}

fn main() {
	println!("cargo:rustc-env=COMPILE_DATE={}", date_output("+%Y-%m-%d"));
	println!("cargo:rustc-env=COMPILE_TIME={}", date_output("+%H:%M:%S"));
	println!("cargo:rerun-if-changed=build.rs");
}
