// ============================================================================
// STREAM SETTINGS — window, tiling and history limits (key=value file)
// ============================================================================

use std::path::Path;

/// Tunables shared by stores, caches and histories of an editing session.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamSettings {
    /// Edge length of the resident pixel window.
    pub window_size: u32,
    /// Largest edge a GPU tile may have.
    pub tile_resolution: u32,
    /// Share a one-pixel border between neighbouring tiles.
    pub tile_overlap: bool,
    /// Edge length of the low-detail global fallback texture.
    pub global_texture_size: u32,
    /// Edge length of undo capture blocks.
    pub history_block_size: u32,
    /// Maximum number of undo steps
    pub max_history_steps: usize,
    /// Undo memory cap in megabytes (0 = unlimited)
    pub max_history_mb: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            window_size: 512,
            tile_resolution: 256,
            tile_overlap: true,
            global_texture_size: crate::cache::DEFAULT_GLOBAL_SIZE,
            history_block_size: crate::history::DEFAULT_BLOCK_SIZE,
            max_history_steps: 50,
            max_history_mb: 100,
        }
    }
}

impl StreamSettings {
    /// Load settings from disk (returns default if file missing or unreadable)
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                log::debug!("settings {} not loaded ({}), using defaults", path.as_ref().display(), e);
                Self::default()
            }
        }
    }

    /// Parse `key=value` lines. Unknown keys are skipped; values that do not
    /// parse keep their default.
    pub fn parse(content: &str) -> Self {
        let d = Self::default();
        let mut s = d.clone();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "window_size" => s.window_size = val.parse().unwrap_or(d.window_size).max(1),
                "tile_resolution" => s.tile_resolution = val.parse().unwrap_or(d.tile_resolution).max(1),
                "tile_overlap" => s.tile_overlap = val == "true",
                "global_texture_size" => s.global_texture_size = val.parse().unwrap_or(d.global_texture_size).max(1),
                "history_block_size" => s.history_block_size = val.parse().unwrap_or(d.history_block_size).max(1),
                "max_history_steps" => s.max_history_steps = val.parse().unwrap_or(d.max_history_steps),
                "max_history_mb" => s.max_history_mb = val.parse().unwrap_or(d.max_history_mb),
                other => log::debug!("ignoring unknown setting '{}'", other),
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "window_size={}\n\
             tile_resolution={}\n\
             tile_overlap={}\n\
             global_texture_size={}\n\
             history_block_size={}\n\
             max_history_steps={}\n\
             max_history_mb={}\n",
            self.window_size,
            self.tile_resolution,
            self.tile_overlap,
            self.global_texture_size,
            self.history_block_size,
            self.max_history_steps,
            self.max_history_mb,
        )
    }

    /// Save settings to disk
    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_config_string())
    }

    /// Undo memory cap in bytes, if any.
    pub fn max_history_bytes(&self) -> Option<usize> {
        (self.max_history_mb > 0).then(|| self.max_history_mb * 1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_falls_back_per_key() {
        let s = StreamSettings::parse(
            "# session\nwindow_size=1024\ntile_resolution=abc\ntile_overlap=false\nmystery=1\nmax_history_mb=0\n",
        );
        assert_eq!(s.window_size, 1024);
        assert_eq!(s.tile_resolution, 256);
        assert!(!s.tile_overlap);
        assert_eq!(s.max_history_bytes(), None);
        assert_eq!(s.global_texture_size, 64);
    }

    #[test]
    fn save_then_load_restores_everything() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stream.cfg");
        let s = StreamSettings {
            window_size: 128,
            tile_resolution: 512,
            tile_overlap: false,
            global_texture_size: 32,
            history_block_size: 16,
            max_history_steps: 7,
            max_history_mb: 3,
        };
        s.save(&path)?;
        assert_eq!(StreamSettings::load(&path), s);
        assert_eq!(StreamSettings::load(dir.path().join("missing.cfg")), StreamSettings::default());
        Ok(())
    }
}
