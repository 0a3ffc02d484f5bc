// Audio rendering by shelling out to FluidSynth.
//
// `fluidsynth -ni <soundfont> <midi> -F <output> -r <rate>` renders a MIDI
// file offline. The output is named after the MIDI file's stem and placed in
// the requested directory; an output that already exists is returned as-is
// without re-rendering.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct AudioRenderer {
    /// Executable to run.
    pub program: String,
    pub sample_rate: u32,
    /// Output file extension; FluidSynth picks the format from it.
    pub extension: String,
}

impl Default for AudioRenderer {
    fn default() -> Self {
        AudioRenderer {
            program: "fluidsynth".into(),
            sample_rate: 44_100,
            extension: "wav".into(),
        }
    }
}

impl AudioRenderer {
    /// Where `midi` renders to inside `output_dir`.
    pub fn output_path(&self, midi: &Path, output_dir: &Path) -> Result<PathBuf> {
        let stem = midi
            .file_stem()
            .ok_or_else(|| Error::Render(format!("{} has no file name", midi.display())))?;
        Ok(output_dir.join(stem).with_extension(&self.extension))
    }

    /// Render `midi` with `soundfont` into `output_dir`. Returns the audio path.
    pub fn render(&self, midi: &Path, soundfont: &Path, output_dir: &Path) -> Result<PathBuf> {
        if !midi.is_file() {
            return Err(Error::Render(format!("MIDI file not found: {}", midi.display())));
        }
        if !soundfont.is_file() {
            return Err(Error::Render(format!("soundfont not found: {}", soundfont.display())));
        }
        let output = self.output_path(midi, output_dir)?;
        if output.exists() {
            tracing::debug!("{} already rendered", output.display());
            return Ok(output);
        }
        std::fs::create_dir_all(output_dir)?;

        tracing::info!("rendering {} -> {}", midi.display(), output.display());
        let result = Command::new(&self.program)
            .arg("-ni")
            .arg(soundfont)
            .arg(midi)
            .arg("-F")
            .arg(&output)
            .arg("-r")
            .arg(self.sample_rate.to_string())
            .output()
            .map_err(|e| Error::Render(format!("failed to run {}: {e}", self.program)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(Error::Render(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                stderr.trim()
            )));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer(program: &str) -> AudioRenderer {
        AudioRenderer {
            program: program.into(),
            ..Default::default()
        }
    }

    fn inputs(dir: &Path) -> (PathBuf, PathBuf) {
        let midi = dir.join("song.mid");
        let sf = dir.join("font.sf2");
        std::fs::write(&midi, b"MThd").unwrap();
        std::fs::write(&sf, b"RIFF").unwrap();
        (midi, sf)
    }

    #[test]
    fn missing_inputs_are_render_errors() {
        let dir = tempfile::tempdir().unwrap();
        let r = AudioRenderer::default();
        let err = r
            .render(&dir.path().join("none.mid"), &dir.path().join("x.sf2"), dir.path())
            .unwrap_err();
        assert!(matches!(err, Error::Render(_)));

        let (midi, _) = inputs(dir.path());
        let err = r.render(&midi, &dir.path().join("missing.sf2"), dir.path()).unwrap_err();
        assert!(matches!(err, Error::Render(_)));
    }

    #[test]
    fn existing_output_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let (midi, sf) = inputs(dir.path());
        let out_dir = dir.path().join("audio");
        std::fs::create_dir_all(&out_dir).unwrap();
        std::fs::write(out_dir.join("song.wav"), b"cached").unwrap();
        // The program does not exist; reaching it would be an error.
        let out = renderer("definitely-not-a-synth").render(&midi, &sf, &out_dir).unwrap();
        assert_eq!(out, out_dir.join("song.wav"));
    }

    #[test]
    fn missing_program_is_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let (midi, sf) = inputs(dir.path());
        let err = renderer("definitely-not-a-synth")
            .render(&midi, &sf, &dir.path().join("audio"))
            .unwrap_err();
        assert!(matches!(err, Error::Render(_)));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let (midi, sf) = inputs(dir.path());
        let err = renderer("false").render(&midi, &sf, dir.path()).unwrap_err();
        assert!(matches!(err, Error::Render(_)));
    }
}
