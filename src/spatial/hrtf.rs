use crate::error::{Result, VoiceFieldError};
use audionimbus::{AudioSettings, Context, Hrtf, HrtfSettings, Sofa, VolumeNormalization};

/// Loads the HRTF used for binaural decoding: Steam Audio's built-in set, or
/// the SOFA file at `sofa_path` when one is configured.
pub(crate) fn load_hrtf(
    context: &Context,
    audio_settings: &AudioSettings,
    sofa_path: Option<&str>,
) -> Result<Hrtf> {
    let sofa_information = match sofa_path {
        Some(path) => {
            let data = std::fs::read(path).map_err(|e| {
                VoiceFieldError::Spatialization(format!("Failed to read HRTF file {}: {}", path, e))
            })?;
            Some(Sofa::Buffer(data))
        }
        None => None,
    };

    let hrtf = Hrtf::try_new(
        context,
        audio_settings,
        &HrtfSettings {
            volume_normalization: VolumeNormalization::None,
            sofa_information,
            ..Default::default()
        },
    )
    .map_err(|e| VoiceFieldError::Spatialization(format!("Failed to create HRTF: {}", e)))?;

    match sofa_path {
        Some(path) => log::info!("Created HRTF from file: {}", path),
        None => log::info!("Created default HRTF"),
    }
    Ok(hrtf)
}
