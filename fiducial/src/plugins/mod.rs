pub mod amoeba;
pub mod art;
pub mod bch;
pub mod forquads;
pub mod grid;
pub mod hierarchical;
pub mod icl1;

use crate::detect::image::ImageU8;
use crate::detect::region::Region;
use crate::family::PluginConfig;
use crate::types::Fiducial;

/// Run the decoder selected by `config` on one region.
///
/// Decoders are stateless and deterministic, and fail silently.
pub fn try_decode(region: &Region, frame: &ImageU8, config: &PluginConfig) -> Option<Fiducial> {
    let found = match config {
        PluginConfig::ForQuads(c) => forquads::try_decode(region, frame, c),
        PluginConfig::Bch(c) => bch::try_decode(region, frame, c),
        PluginConfig::Hierarchical(c) => hierarchical::try_decode(region, frame, c),
        PluginConfig::Art(c) => art::try_decode(region, frame, c),
        PluginConfig::Amoeba(c) => amoeba::try_decode(region, frame, c),
        PluginConfig::Icl1(c) => icl1::try_decode(region, frame, c),
    };
    found.map(|f| f.with_inverted(region.light))
}
