use std::fmt;

/// Indentation-aware buffer for generated kernel source.
#[derive(Debug, Default, Clone)]
pub struct KernelSourceStream {
    source: String,
    indent: usize,
}

impl KernelSourceStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, line: &str) -> &mut Self {
        self.block(line)
    }

    /// Appends a multi-line block at the current indentation. Leading and
    /// trailing blank lines are dropped and the block's common indentation is
    /// stripped, so raw string literals can be indented with the code.
    pub fn block(&mut self, block: &str) -> &mut Self {
        if block.is_empty() {
            return self;
        }
        let pad = "  ".repeat(self.indent);
        let mut lines: Vec<&str> = block.split('\n').collect();
        if matches!(lines.first(), Some(line) if line.trim().is_empty()) {
            lines.remove(0);
        }
        if matches!(lines.last(), Some(line) if line.trim().is_empty()) {
            lines.pop();
        }

        let min_indent = lines
            .iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.chars().take_while(|c| *c == ' ' || *c == '\t').count())
            .min()
            .unwrap_or(0);

        for line in lines {
            if line.trim().is_empty() {
                self.source.push('\n');
                continue;
            }
            let trimmed = line
                .get(min_indent..)
                .unwrap_or_else(|| line.trim_start());
            self.source.push_str(&pad);
            self.source.push_str(trimmed);
            self.source.push('\n');
        }
        self
    }

    pub fn inc_tab(&mut self) -> &mut Self {
        self.indent += 1;
        self
    }

    pub fn dec_tab(&mut self) -> &mut Self {
        self.indent = self.indent.saturating_sub(1);
        self
    }

    /// Emits `header {`, the body one level deeper, then `}`.
    pub fn scope<F>(&mut self, header: &str, body: F) -> &mut Self
    where
        F: FnOnce(&mut Self),
    {
        if header.is_empty() {
            self.line("{");
        } else {
            self.line(&format!("{header} {{"));
        }
        self.inc_tab();
        body(self);
        self.dec_tab();
        self.line("}")
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn into_string(self) -> String {
        self.source
    }
}

impl fmt::Display for KernelSourceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
