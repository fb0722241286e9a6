use super::ambisonic::AmbisonicListener;
use super::emitter::Emitter;
use super::{AudioProperties, Capability, CapabilitySet, SpatialTier};
use crate::error::{Result, VoiceFieldError};
use crate::graph::{AudioGraphLedger, NodeId};
use crate::math::PoseState;
use std::fmt;

/// Rendering parameters a listener is built for.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerContext {
    pub sample_rate: u32,
    pub block_size: usize,
    pub channels: usize,
    pub hrtf_path: Option<String>,
}

/// How the Medium tier applies parameter changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PannerApi {
    /// Gains ramp sample by sample across each render block.
    Modern,
    /// Gains change once at the start of each render block.
    Legacy,
}

/// The algorithm-specific part of a listener.
pub enum ListenerBackend {
    Passthrough,
    Volume,
    Panner(PannerApi),
    Ambisonic(Box<AmbisonicListener>),
}

impl ListenerBackend {
    pub fn tier(&self) -> SpatialTier {
        match self {
            Self::Passthrough => SpatialTier::None,
            Self::Volume => SpatialTier::Low,
            Self::Panner(_) => SpatialTier::Medium,
            Self::Ambisonic(_) => SpatialTier::High,
        }
    }
}

impl fmt::Debug for ListenerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passthrough => f.write_str("Passthrough"),
            Self::Volume => f.write_str("Volume"),
            Self::Panner(api) => f.debug_tuple("Panner").field(api).finish(),
            Self::Ambisonic(_) => f.write_str("Ambisonic"),
        }
    }
}

/// Constructs listener backends for each tier.
///
/// The provided methods are the production implementations; overriding one
/// lets a caller make that tier fail.
pub trait ListenerBuilder {
    fn build_ambisonic(&self, ctx: &ListenerContext) -> Result<ListenerBackend> {
        require_stereo(ctx, "Ambisonic")?;
        let listener = AmbisonicListener::new(ctx)?;
        Ok(ListenerBackend::Ambisonic(Box::new(listener)))
    }

    fn build_panner(&self, ctx: &ListenerContext, api: PannerApi) -> Result<ListenerBackend> {
        require_stereo(ctx, "Panner")?;
        Ok(ListenerBackend::Panner(api))
    }

    fn build_volume(&self, ctx: &ListenerContext) -> Result<ListenerBackend> {
        if ctx.channels == 0 || ctx.block_size == 0 || ctx.sample_rate == 0 {
            return Err(VoiceFieldError::Configuration(format!(
                "Cannot render {} channel(s) of {} frame(s) at {} Hz",
                ctx.channels, ctx.block_size, ctx.sample_rate
            )));
        }
        Ok(ListenerBackend::Volume)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultListenerBuilder;

impl ListenerBuilder for DefaultListenerBuilder {}

fn require_stereo(ctx: &ListenerContext, what: &str) -> Result<()> {
    if ctx.channels < 2 {
        return Err(VoiceFieldError::Spatialization(format!(
            "{} listener needs at least 2 output channels, got {}",
            what, ctx.channels
        )));
    }
    Ok(())
}

/// Builds the best listener backend at or below `requested`.
///
/// Every failed High or Medium attempt clears its capability in `caps` and
/// the walk continues downward. Only a failure of the Low tier is returned,
/// as [`VoiceFieldError::NoListener`].
pub fn create_listener_backend(
    requested: SpatialTier,
    caps: &mut CapabilitySet,
    builder: &dyn ListenerBuilder,
    ctx: &ListenerContext,
) -> Result<ListenerBackend> {
    if requested == SpatialTier::None {
        return Ok(ListenerBackend::Passthrough);
    }

    if requested >= SpatialTier::High && caps.is_supported(Capability::Ambisonic) {
        match builder.build_ambisonic(ctx) {
            Ok(backend) => return Ok(backend),
            Err(e) => {
                log::warn!("Ambisonic listener unavailable, disabling it: {}", e);
                caps.disable(Capability::Ambisonic);
            }
        }
    }

    if requested >= SpatialTier::Medium && caps.has_positional() {
        for (api, capability) in [
            (PannerApi::Modern, Capability::PannerModern),
            (PannerApi::Legacy, Capability::PannerLegacy),
        ] {
            if !caps.is_supported(capability) {
                continue;
            }
            match builder.build_panner(ctx, api) {
                Ok(backend) => return Ok(backend),
                Err(e) => {
                    log::warn!("{:?} panner unavailable, disabling it: {}", api, e);
                    caps.disable(capability);
                }
            }
        }
    }

    builder
        .build_volume(ctx)
        .map_err(|e| VoiceFieldError::NoListener(e.to_string()))
}

/// The local user's ears: the active backend plus the listener pose, the
/// shared audio properties and the ledger nodes emitters feed into.
pub struct Listener {
    backend: ListenerBackend,
    pose: PoseState,
    properties: AudioProperties,
    channels: usize,
    destination: NodeId,
    output: NodeId,
    decoder: Option<NodeId>,
}

impl Listener {
    pub fn new(
        backend: ListenerBackend,
        ctx: &ListenerContext,
        properties: AudioProperties,
        ledger: &mut AudioGraphLedger,
        destination: NodeId,
    ) -> Self {
        let decoder = match backend {
            ListenerBackend::Ambisonic(_) => {
                let node = ledger.create_node("ambisonic decoder");
                ledger.connect(node, destination);
                Some(node)
            }
            _ => None,
        };

        log::info!("Created {} listener ({:?})", backend.tier(), backend);

        Self {
            backend,
            pose: PoseState::identity(),
            properties,
            channels: ctx.channels,
            destination,
            output: decoder.unwrap_or(destination),
            decoder,
        }
    }

    pub fn tier(&self) -> SpatialTier {
        self.backend.tier()
    }

    pub fn backend(&self) -> &ListenerBackend {
        &self.backend
    }

    pub fn pose(&self) -> &PoseState {
        &self.pose
    }

    pub fn audio_properties(&self) -> &AudioProperties {
        &self.properties
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Ledger node spatialized emitters connect to.
    pub fn output_node(&self) -> NodeId {
        self.output
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    /// Moves the listener to the pose the local user is rendered at.
    pub fn update(&mut self, pose: PoseState) {
        self.pose = pose;
    }

    pub fn set_audio_properties(&mut self, properties: AudioProperties) {
        self.properties = properties;
    }

    /// Creates an emitter wired into this listener. Non-spatialized sources
    /// get a passthrough emitter whatever the tier.
    pub fn create_spatializer(
        &mut self,
        spatialize: bool,
        is_remote: bool,
        ledger: &mut AudioGraphLedger,
        input: NodeId,
        label: &str,
    ) -> Emitter {
        if !spatialize {
            return Emitter::passthrough(ledger, input, self.destination, is_remote);
        }

        match &self.backend {
            ListenerBackend::Passthrough => {
                Emitter::passthrough(ledger, input, self.destination, is_remote)
            }
            ListenerBackend::Volume => Emitter::volume(
                ledger,
                input,
                self.output,
                label,
                self.properties,
                is_remote,
            ),
            ListenerBackend::Panner(api) => Emitter::panner(
                ledger,
                input,
                self.output,
                label,
                *api,
                self.properties,
                is_remote,
            ),
            ListenerBackend::Ambisonic(listener) => match listener.create_emitter() {
                Ok(encoder) => Emitter::ambisonic(
                    ledger,
                    input,
                    self.output,
                    label,
                    encoder,
                    self.properties,
                    is_remote,
                ),
                Err(e) => {
                    log::warn!(
                        "Could not create ambisonic emitter for {}, using distance gain: {}",
                        label,
                        e
                    );
                    Emitter::volume(
                        ledger,
                        input,
                        self.destination,
                        label,
                        self.properties,
                        is_remote,
                    )
                }
            },
        }
    }

    /// Clears per-block state before emitters render into it.
    pub fn begin_block(&mut self) {
        if let ListenerBackend::Ambisonic(listener) = &mut self.backend {
            listener.begin_block();
        }
    }

    /// Adds whatever the listener accumulated this block to `out`.
    pub fn finish_block(&mut self, out: &mut [f32]) -> Result<()> {
        let channels = self.channels;
        if let ListenerBackend::Ambisonic(listener) = &mut self.backend {
            listener.finish_block(out, channels)?;
        }
        Ok(())
    }

    pub(crate) fn ambisonic_mut(&mut self) -> Option<&mut AmbisonicListener> {
        match &mut self.backend {
            ListenerBackend::Ambisonic(listener) => Some(&mut **listener),
            _ => None,
        }
    }

    /// Removes the listener's own nodes from the ledger.
    pub fn dispose(self, ledger: &mut AudioGraphLedger) {
        if let Some(decoder) = self.decoder {
            ledger.disconnect(decoder);
            ledger.release_node(decoder);
        }
        log::debug!("Disposed {} listener", self.backend.tier());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo() -> ListenerContext {
        ListenerContext {
            sample_rate: 48000,
            block_size: 256,
            channels: 2,
            hrtf_path: None,
        }
    }

    /// Fails the tiers it is told to fail and counts attempts.
    #[derive(Default)]
    struct FailingBuilder {
        ambisonic: bool,
        modern: bool,
        legacy: bool,
        volume: bool,
        attempts: std::cell::Cell<usize>,
    }

    impl ListenerBuilder for FailingBuilder {
        fn build_ambisonic(&self, _ctx: &ListenerContext) -> Result<ListenerBackend> {
            self.attempts.set(self.attempts.get() + 1);
            if self.ambisonic {
                return Err(VoiceFieldError::Spatialization("no ambisonics".into()));
            }
            Ok(ListenerBackend::Passthrough)
        }

        fn build_panner(&self, ctx: &ListenerContext, api: PannerApi) -> Result<ListenerBackend> {
            self.attempts.set(self.attempts.get() + 1);
            let fail = match api {
                PannerApi::Modern => self.modern,
                PannerApi::Legacy => self.legacy,
            };
            if fail {
                return Err(VoiceFieldError::Spatialization("no panner".into()));
            }
            DefaultListenerBuilder.build_panner(ctx, api)
        }

        fn build_volume(&self, ctx: &ListenerContext) -> Result<ListenerBackend> {
            self.attempts.set(self.attempts.get() + 1);
            if self.volume {
                return Err(VoiceFieldError::Configuration("broken".into()));
            }
            DefaultListenerBuilder.build_volume(ctx)
        }
    }

    #[test]
    fn test_low_only_capabilities_yield_volume() {
        let mut caps = CapabilitySet::none();
        for requested in [SpatialTier::High, SpatialTier::Medium, SpatialTier::Low] {
            let backend =
                create_listener_backend(requested, &mut caps, &DefaultListenerBuilder, &stereo())
                    .unwrap();
            assert_eq!(backend.tier(), SpatialTier::Low);
        }
    }

    #[test]
    fn test_failures_clear_flags_and_fall_through() {
        let builder = FailingBuilder {
            ambisonic: true,
            modern: true,
            ..Default::default()
        };
        let mut caps = CapabilitySet::all();

        let backend =
            create_listener_backend(SpatialTier::High, &mut caps, &builder, &stereo()).unwrap();
        assert!(matches!(backend, ListenerBackend::Panner(PannerApi::Legacy)));
        assert!(!caps.is_supported(Capability::Ambisonic));
        assert!(!caps.is_supported(Capability::PannerModern));
        assert!(caps.is_supported(Capability::PannerLegacy));
        assert_eq!(builder.attempts.get(), 3);

        // cleared capabilities are not retried
        builder.attempts.set(0);
        create_listener_backend(SpatialTier::High, &mut caps, &builder, &stereo()).unwrap();
        assert_eq!(builder.attempts.get(), 1);
    }

    #[test]
    fn test_all_positional_failures_fall_to_low() {
        let builder = FailingBuilder {
            modern: true,
            legacy: true,
            ..Default::default()
        };
        let mut caps = CapabilitySet::all();
        let backend =
            create_listener_backend(SpatialTier::Medium, &mut caps, &builder, &stereo()).unwrap();
        assert_eq!(backend.tier(), SpatialTier::Low);
        assert!(!caps.has_positional());
        assert!(caps.is_supported(Capability::Ambisonic));
    }

    #[test]
    fn test_low_failure_is_fatal() {
        let builder = FailingBuilder {
            volume: true,
            ..Default::default()
        };
        let mut caps = CapabilitySet::none();
        let err = create_listener_backend(SpatialTier::Low, &mut caps, &builder, &stereo())
            .unwrap_err();
        assert!(matches!(err, VoiceFieldError::NoListener(_)));
    }

    #[test]
    fn test_none_always_succeeds() {
        let builder = FailingBuilder {
            volume: true,
            ..Default::default()
        };
        let mut caps = CapabilitySet::none();
        let backend =
            create_listener_backend(SpatialTier::None, &mut caps, &builder, &stereo()).unwrap();
        assert_eq!(backend.tier(), SpatialTier::None);
        assert_eq!(builder.attempts.get(), 0);
    }

    #[test]
    fn test_mono_output_skips_positional_tiers() {
        let ctx = ListenerContext {
            channels: 1,
            ..stereo()
        };
        let mut caps = CapabilitySet::all();
        let backend =
            create_listener_backend(SpatialTier::High, &mut caps, &DefaultListenerBuilder, &ctx)
                .unwrap();
        assert_eq!(backend.tier(), SpatialTier::Low);
        assert_eq!(caps, CapabilitySet::none());
    }

    #[test]
    fn test_non_spatialized_sources_get_passthrough() {
        let mut ledger = AudioGraphLedger::new();
        let destination = ledger.create_node("destination");
        let mut listener = Listener::new(
            ListenerBackend::Panner(PannerApi::Modern),
            &stereo(),
            AudioProperties::default(),
            &mut ledger,
            destination,
        );
        let input = ledger.create_node("clip gain");
        let emitter = listener.create_spatializer(false, false, &mut ledger, input, "chime");
        assert_eq!(emitter.tier(), SpatialTier::None);
        let emitter2 = listener.create_spatializer(true, true, &mut ledger, input, "alice");
        assert_eq!(emitter2.tier(), SpatialTier::Medium);
        assert!(emitter2.is_remote());

        emitter.dispose(&mut ledger);
        emitter2.dispose(&mut ledger);
        listener.dispose(&mut ledger);
        assert_eq!(ledger.edge_count(), 0);
        assert_eq!(ledger.incoming_count(destination), 0);
    }
}
