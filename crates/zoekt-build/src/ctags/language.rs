use std::path::Path;

/// Language of a file guessed from its name, using linguist style names.
pub fn detect_language(name: &str) -> Option<&'static str> {
    let path = Path::new(name);
    if let Some(file) = path.file_name().and_then(|f| f.to_str()) {
        match file {
            "Makefile" | "GNUmakefile" => return Some("Makefile"),
            "Dockerfile" => return Some("Dockerfile"),
            _ => {}
        }
    }
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    let lang = match ext.as_str() {
        "rs" => "Rust",
        "go" => "Go",
        "ts" | "tsx" => "TypeScript",
        "js" | "jsx" | "mjs" | "cjs" => "JavaScript",
        "py" => "Python",
        "java" => "Java",
        "kt" | "kts" => "Kotlin",
        "scala" => "Scala",
        "cs" => "C#",
        "c" | "h" => "C",
        "cpp" | "cc" | "cxx" | "hpp" | "hxx" => "C++",
        "rb" => "Ruby",
        "php" => "PHP",
        "sh" | "bash" => "Shell",
        "md" => "Markdown",
        "yml" | "yaml" => "YAML",
        "toml" => "TOML",
        "json" => "JSON",
        _ => return None,
    };
    Some(lang)
}
