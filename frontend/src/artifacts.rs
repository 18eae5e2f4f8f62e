//! Classification helpers for files produced by design-mode runs.

const WRITE_FILE_PREFIX: &str = "write-file:";

/// Last path segment, without the `write-file:` marker.
pub fn file_name(path: &str) -> &str {
    let stripped = path.strip_prefix(WRITE_FILE_PREFIX).unwrap_or(path);
    match stripped.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        _ => path,
    }
}

/// Lower-cased extension including the dot, or an empty string.
pub fn extension(path: &str) -> String {
    let name = file_name(path);
    match name.rfind('.') {
        Some(pos) if pos + 1 < name.len() => name[pos..].to_lowercase(),
        _ => String::new(),
    }
}

pub fn language(path: &str) -> &'static str {
    match extension(path).as_str() {
        ".html" | ".htm" => "html",
        ".js" | ".jsx" | ".mjs" | ".cjs" => "javascript",
        ".ts" | ".tsx" => "typescript",
        ".json" => "json",
        ".css" => "css",
        ".scss" => "scss",
        ".md" | ".markdown" | ".skill" => "markdown",
        ".py" => "python",
        ".rb" => "ruby",
        ".go" => "go",
        ".rs" => "rust",
        ".java" => "java",
        ".c" | ".h" => "c",
        ".cpp" | ".hpp" => "cpp",
        ".sh" | ".bash" | ".zsh" => "bash",
        ".sql" => "sql",
        ".xml" => "xml",
        ".yaml" | ".yml" => "yaml",
        ".toml" => "toml",
        ".svg" => "svg",
        ".png" | ".jpg" | ".jpeg" | ".gif" => "image",
        _ => "text",
    }
}

/// Source code, as opposed to prose, images or plain text.
pub fn is_code(path: &str) -> bool {
    !matches!(language(path), "text" | "markdown" | "image")
}

pub fn is_previewable(path: &str) -> bool {
    matches!(extension(path).as_str(), ".html" | ".htm" | ".md" | ".markdown")
}

pub fn is_write_file(path: &str) -> bool {
    path.starts_with(WRITE_FILE_PREFIX)
}

pub fn display_kind(path: &str) -> String {
    let ext = extension(path);
    let known = match ext.as_str() {
        ".html" | ".htm" => "HTML",
        ".js" | ".jsx" | ".mjs" | ".cjs" => "JavaScript",
        ".ts" | ".tsx" => "TypeScript",
        ".css" => "CSS",
        ".md" => "Markdown",
        ".skill" => "Skill",
        ".py" => "Python",
        ".json" => "JSON",
        ".svg" => "SVG",
        "" => "File",
        _ => return ext[1..].to_uppercase(),
    };
    known.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_extensions() {
        assert_eq!(file_name("write-file:/mnt/out/index.html"), "index.html");
        assert_eq!(file_name("notes.md"), "notes.md");
        assert_eq!(extension("/a.b/README"), "");
        assert_eq!(extension("/out/Report.MD"), ".md");
        assert_eq!(extension("/out/.env."), "");
    }

    #[test]
    fn classification() {
        assert_eq!(language("app.tsx"), "typescript");
        assert_eq!(language("unknown.xyz"), "text");
        assert!(is_code("main.rs"));
        assert!(!is_code("readme.md"));
        assert!(!is_code("photo.png"));
        assert!(is_previewable("/out/site.htm"));
        assert!(!is_previewable("/out/app.js"));
        assert!(is_write_file("write-file:/x.txt"));
    }

    #[test]
    fn display_kinds() {
        assert_eq!(display_kind("index.html"), "HTML");
        assert_eq!(display_kind("data.csv"), "CSV");
        assert_eq!(display_kind("Makefile"), "File");
    }
}
