use crate::models::media::{RenditionProfile, SourceProbe};
use smallvec::SmallVec;

/// libx264 rejects odd frame sizes.
fn even(d: u32) -> u32 {
    d.max(2) & !1
}

/// The rendition set for a source: every ladder rung whose dimensions do
/// not exceed the source's, in the ladder's (ascending) order. A source
/// below the lowest rung gets a single native-resolution rendition at the
/// lowest rung's bitrate, so the set is never empty.
pub fn plan_ladder(
    ladder: &[RenditionProfile],
    src: &SourceProbe,
) -> SmallVec<[RenditionProfile; 5]> {
    let mut plan: SmallVec<[RenditionProfile; 5]> = ladder
        .iter()
        .filter(|p| p.width <= src.width && p.height <= src.height)
        .cloned()
        .collect();
    if plan.is_empty()
        && let Some(lowest) = ladder.first()
    {
        plan.push(RenditionProfile {
            name: "native".to_string(),
            width: even(src.width),
            height: even(src.height),
            bitrate: lowest.bitrate.clone(),
            fps: lowest.fps,
        });
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::media::default_ladder;

    fn src(width: u32, height: u32) -> SourceProbe {
        SourceProbe {
            container: "mov,mp4,m4a,3gp,3g2,mj2".into(),
            duration_secs: 60.0,
            width,
            height,
            fps: 30.0,
            has_audio: true,
        }
    }

    #[test]
    fn hd_source_gets_three_rungs() {
        let plan = plan_ladder(&default_ladder(), &src(1280, 720));
        let names: Vec<_> = plan.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["240p", "360p", "720p"]);
    }

    #[test]
    fn uhd_source_gets_full_ladder() {
        let plan = plan_ladder(&default_ladder(), &src(3840, 2160));
        assert_eq!(plan.len(), 5);
        assert_eq!(plan.last().unwrap().name, "2160p");
    }

    #[test]
    fn exact_lowest_rung_matches() {
        let plan = plan_ladder(&default_ladder(), &src(426, 240));
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].name, "240p");
    }

    #[test]
    fn tiny_source_gets_native_rendition() {
        let plan = plan_ladder(&default_ladder(), &src(201, 113));
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].name, "native");
        // dimensions rounded down to even for the encoder
        assert_eq!((plan[0].width, plan[0].height), (200, 112));
        assert_eq!(plan[0].bitrate, "400k");
    }

    #[test]
    fn portrait_source_only_fits_matching_rungs() {
        // 720x1280 portrait: heights fit up to 720 but widths cap at 426/640
        let plan = plan_ladder(&default_ladder(), &src(720, 1280));
        let names: Vec<_> = plan.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["240p", "360p"]);
    }
}
