use crate::config::{
    self, AllowAv1, DualAudio, HighestQuality, Include4k, RepackProper, CONFIG,
};

/// Everything we can pull out of a raw torrent or file name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTitle {
    pub title: String,
    pub year: Option<i32>,
    pub seasons: Vec<i64>,
    pub episodes: Vec<i64>,
    pub resolution: Option<Resolution>,
    pub quality: Option<Quality>,
    pub codec: Option<Codec>,
    pub proper: bool,
    pub repack: bool,
    pub remux: bool,
    pub hdr: bool,
    pub dual_audio: bool,
    pub complete: bool,
}

impl ParsedTitle {
    pub fn is_movie(&self) -> bool {
        self.seasons.is_empty() && self.episodes.is_empty()
    }

    pub fn references_episode(&self, season: i64, episode: i64, one_season_show: bool) -> bool {
        if !self.episodes.contains(&episode) {
            return false;
        }
        if self.seasons.contains(&season) {
            return true;
        }
        one_season_show && self.seasons.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Resolution {
    R480p,
    R720p,
    R1080p,
    R2160p,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    BluRay,
    WebDl,
    WebRip,
    HdTv,
    DvdRip,
    Cam,
    Telesync,
    Screener,
    Workprint,
}

impl Quality {
    /// Sources that are never worth fetching.
    pub fn is_banned(&self) -> bool {
        matches!(
            self,
            Quality::Cam | Quality::Telesync | Quality::Screener | Quality::Workprint
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    H265,
    Xvid,
    Av1,
}

fn is_year(token: &str) -> Option<i32> {
    if token.len() != 4 || !token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year: i32 = token.parse().ok()?;
    (1900..2100).contains(&year).then_some(year)
}

fn parse_number(digits: &str) -> Option<i64> {
    if digits.is_empty() || digits.len() > 3 {
        return None;
    }
    digits.parse().ok()
}

/// Parse `sNN`, `sNNeNN`, `sNNeNN-eNN`, `sNNeNNeNN` shapes.
fn parse_season_episode(token: &str) -> Option<(Vec<i64>, Vec<i64>)> {
    let bytes = token.as_bytes();
    if bytes.first() != Some(&b's') {
        return None;
    }
    let season_end = token[1..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(token.len(), |offset| 1 + offset);
    let season = parse_number(&token[1..season_end])?;
    let mut episodes = Vec::new();
    let mut rest = &token[season_end..];
    let mut range_pending = false;
    while !rest.is_empty() {
        let marker_len = if rest.starts_with('e') {
            1
        } else if rest.starts_with("-e") {
            range_pending = true;
            2
        } else if rest.starts_with('-') && rest[1..].starts_with(|c: char| c.is_ascii_digit()) {
            range_pending = true;
            1
        } else {
            return None;
        };
        rest = &rest[marker_len..];
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let episode = parse_number(&rest[..digits_end])?;
        if range_pending {
            let last = *episodes.last()?;
            for number in last + 1..=episode {
                episodes.push(number);
            }
            range_pending = false;
        } else {
            episodes.push(episode);
        }
        rest = &rest[digits_end..];
    }
    Some((vec![season], episodes))
}

/// Parse the `NxNN` shape.
fn parse_cross_notation(token: &str) -> Option<(Vec<i64>, Vec<i64>)> {
    let (season, episode) = token.split_once('x')?;
    if season.is_empty() || episode.is_empty() {
        return None;
    }
    let season = parse_number(season)?;
    let episode_digits_end = episode
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(episode.len());
    let episode = parse_number(&episode[..episode_digits_end])?;
    Some((vec![season], vec![episode]))
}

/// Parse a bare `eNN`/`epNN` episode tag with no season.
fn parse_bare_episode(token: &str) -> Option<i64> {
    let digits = token
        .strip_prefix("ep")
        .or_else(|| token.strip_prefix('e'))?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    parse_number(digits)
}

/// Break a raw torrent title into parsed metadata. Name tokens before the
/// first recognized marker become the title.
pub fn parse_title(raw: &str) -> ParsedTitle {
    let lowered = raw.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| {
            c.is_whitespace() || matches!(c, '.' | '_' | '[' | ']' | '(' | ')' | '+' | ',')
        })
        .filter(|token| !token.is_empty())
        .collect();

    let mut parsed = ParsedTitle::default();
    let mut name_tokens: Vec<&str> = Vec::new();
    let mut name_done = false;

    for token in tokens {
        if let Some((seasons, episodes)) = parse_season_episode(token) {
            for season in seasons {
                if !parsed.seasons.contains(&season) {
                    parsed.seasons.push(season);
                }
            }
            for episode in episodes {
                if !parsed.episodes.contains(&episode) {
                    parsed.episodes.push(episode);
                }
            }
            name_done = true;
            continue;
        }
        if let Some((seasons, episodes)) = parse_cross_notation(token) {
            parsed.seasons.extend(seasons);
            parsed.episodes.extend(episodes);
            name_done = true;
            continue;
        }
        match token {
            "season" | "seasons" | "complete" => {
                parsed.complete = true;
                name_done = true;
                continue;
            }
            "2160p" | "4k" | "uhd" => {
                parsed.resolution = Some(Resolution::R2160p);
                name_done = true;
                continue;
            }
            "1080p" => {
                parsed.resolution = Some(Resolution::R1080p);
                name_done = true;
                continue;
            }
            "720p" => {
                parsed.resolution = Some(Resolution::R720p);
                name_done = true;
                continue;
            }
            "480p" | "360p" => {
                parsed.resolution = Some(Resolution::R480p);
                name_done = true;
                continue;
            }
            "bluray" | "blu-ray" | "bdrip" | "brrip" => {
                parsed.quality = Some(Quality::BluRay);
                name_done = true;
                continue;
            }
            "web-dl" | "webdl" | "web" => {
                parsed.quality = Some(Quality::WebDl);
                name_done = true;
                continue;
            }
            "webrip" | "web-rip" => {
                parsed.quality = Some(Quality::WebRip);
                name_done = true;
                continue;
            }
            "hdtv" | "hdtvrip" | "tvrip" => {
                parsed.quality = Some(Quality::HdTv);
                name_done = true;
                continue;
            }
            "dvdrip" | "dvd-rip" | "dvdscr" | "dvd-r" | "dsrip" | "vodrip" => {
                parsed.quality = Some(Quality::DvdRip);
                name_done = true;
                continue;
            }
            "cam" | "camrip" | "hdcam" => {
                parsed.quality = Some(Quality::Cam);
                name_done = true;
                continue;
            }
            "telesync" | "ts" | "telecine" | "tc" => {
                parsed.quality = Some(Quality::Telesync);
                name_done = true;
                continue;
            }
            "screener" | "scr" => {
                parsed.quality = Some(Quality::Screener);
                name_done = true;
                continue;
            }
            "workprint" => {
                parsed.quality = Some(Quality::Workprint);
                name_done = true;
                continue;
            }
            "x264" | "h264" | "h" => {
                if token != "h" {
                    parsed.codec = Some(Codec::H264);
                }
                name_done = true;
                continue;
            }
            "x265" | "h265" | "hevc" => {
                parsed.codec = Some(Codec::H265);
                name_done = true;
                continue;
            }
            "264" => {
                parsed.codec = Some(Codec::H264);
                continue;
            }
            "265" => {
                parsed.codec = Some(Codec::H265);
                continue;
            }
            "xvid" | "divx" => {
                parsed.codec = Some(Codec::Xvid);
                name_done = true;
                continue;
            }
            "av1" => {
                parsed.codec = Some(Codec::Av1);
                name_done = true;
                continue;
            }
            "proper" => {
                parsed.proper = true;
                name_done = true;
                continue;
            }
            "repack" | "rerip" => {
                parsed.repack = true;
                name_done = true;
                continue;
            }
            "remux" => {
                parsed.remux = true;
                name_done = true;
                continue;
            }
            "hdr" | "hdr10" | "dv" | "dolby" | "vision" => {
                parsed.hdr = true;
                name_done = true;
                continue;
            }
            "dual" | "multi" => {
                parsed.dual_audio = true;
                name_done = true;
                continue;
            }
            _ => {}
        }
        if let Some(episode) = parse_bare_episode(token) {
            parsed.episodes.push(episode);
            name_done = true;
            continue;
        }
        match is_year(token) {
            // the first year ends the title, later ones are noise; a
            // leading year is part of the title ("2001 A Space Odyssey")
            Some(year) if !name_tokens.is_empty() => {
                if parsed.year.is_none() {
                    parsed.year = Some(year);
                }
                name_done = true;
                continue;
            }
            _ => {}
        }
        if !name_done {
            name_tokens.push(token);
        }
    }

    parsed.title = name_tokens.join(" ");
    parsed
}

pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Candidates are only accepted when the parsed title corresponds to the
/// item's top title.
pub fn title_match(wanted: &str, candidate: &str) -> bool {
    let wanted = normalize_title(wanted);
    let candidate = normalize_title(candidate);
    if wanted.is_empty() || candidate.is_empty() {
        return false;
    }
    wanted == candidate
}

/// Ranking preferences, snapshotted from configuration per scrape run.
#[derive(Debug, Clone)]
pub struct RankingProfile {
    pub include_4k: bool,
    pub highest_quality: bool,
    pub repack_proper: bool,
    pub dual_audio: bool,
    pub allow_av1: bool,
}

impl RankingProfile {
    pub fn from_config() -> Self {
        Self {
            include_4k: CONFIG.get_value::<Include4k>().0,
            highest_quality: CONFIG.get_value::<HighestQuality>().0,
            repack_proper: CONFIG.get_value::<RepackProper>().0,
            dual_audio: CONFIG.get_value::<DualAudio>().0,
            allow_av1: CONFIG.get_value::<AllowAv1>().0,
        }
    }

    pub fn allowed_resolutions(&self) -> &'static [Resolution] {
        if self.highest_quality || self.include_4k {
            &[Resolution::R2160p, Resolution::R1080p, Resolution::R720p]
        } else {
            &[Resolution::R1080p, Resolution::R720p]
        }
    }
}

impl Default for RankingProfile {
    fn default() -> Self {
        Self {
            include_4k: config::Include4k::default().0,
            highest_quality: config::HighestQuality::default().0,
            repack_proper: config::RepackProper::default().0,
            dual_audio: config::DualAudio::default().0,
            allow_av1: config::AllowAv1::default().0,
        }
    }
}

/// Score a candidate, `None` meaning garbage that must be discarded.
pub fn rank(parsed: &ParsedTitle, profile: &RankingProfile) -> Option<i32> {
    if let Some(quality) = parsed.quality {
        if quality.is_banned() {
            return None;
        }
    }
    match parsed.codec {
        Some(Codec::Xvid) => return None,
        Some(Codec::Av1) if !profile.allow_av1 => return None,
        _ => {}
    }
    if let Some(resolution) = parsed.resolution {
        if !profile.allowed_resolutions().contains(&resolution) {
            return None;
        }
    }

    let mut score = 0;
    score += match parsed.resolution {
        Some(Resolution::R2160p) if profile.include_4k || profile.highest_quality => 80,
        Some(Resolution::R1080p) => 100,
        Some(Resolution::R720p) => 40,
        _ => 10,
    };
    score += match parsed.quality {
        Some(Quality::BluRay) => 30,
        Some(Quality::WebDl) => 25,
        Some(Quality::WebRip) => 15,
        Some(Quality::HdTv) => 5,
        _ => 0,
    };
    if profile.highest_quality {
        if parsed.remux {
            score += 50;
        }
        if parsed.hdr {
            score += 25;
        }
        if parsed.resolution == Some(Resolution::R2160p) {
            score += 60;
        }
    }
    if profile.repack_proper && (parsed.proper || parsed.repack) {
        score += 15;
    }
    if profile.dual_audio && parsed.dual_audio {
        score += 20;
    }
    Some(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_names() {
        let tests = [
            (
                "Cyberpunk.Edgerunners.S01E02.DUBBED.1080p.WEBRip.x265-RARBG",
                ("cyberpunk edgerunners", vec![1], vec![2]),
            ),
            (
                "shogun.2024.s01e05.2160p.web.h265-successfulcrab",
                ("shogun", vec![1], vec![5]),
            ),
            (
                "Foo.Bar.1x02.720p.HDTV.x264",
                ("foo bar", vec![1], vec![2]),
            ),
            ("Show.Name.S02.1080p.WEB-DL", ("show name", vec![2], vec![])),
        ];
        for (raw, (title, seasons, episodes)) in tests {
            let parsed = parse_title(raw);
            assert_eq!(parsed.title, title, "{raw}");
            assert_eq!(parsed.seasons, seasons, "{raw}");
            assert_eq!(parsed.episodes, episodes, "{raw}");
        }
    }

    #[test]
    fn episode_ranges() {
        let parsed = parse_title("Show.S01E01-E03.1080p");
        assert_eq!(parsed.episodes, vec![1, 2, 3]);
        let parsed = parse_title("Show.S01E05E06.1080p");
        assert_eq!(parsed.episodes, vec![5, 6]);
    }

    #[test]
    fn bare_episode_without_season() {
        let parsed = parse_title("show.name.e01.mkv");
        assert_eq!(parsed.title, "show name");
        assert!(parsed.seasons.is_empty());
        assert_eq!(parsed.episodes, vec![1]);
        assert!(parsed.references_episode(1, 1, true));
        assert!(!parsed.references_episode(1, 1, false));
    }

    #[test]
    fn movie_names() {
        let parsed = parse_title("The.Matrix.1999.1080p.BluRay.x264");
        assert_eq!(parsed.title, "the matrix");
        assert_eq!(parsed.year, Some(1999));
        assert!(parsed.is_movie());
        assert_eq!(parsed.resolution, Some(Resolution::R1080p));
        assert_eq!(parsed.quality, Some(Quality::BluRay));
    }

    #[test]
    fn leading_year_belongs_to_the_title() {
        let parsed = parse_title("2012.2009.1080p.BluRay");
        assert_eq!(parsed.title, "2012");
        assert_eq!(parsed.year, Some(2009));
    }

    #[test]
    fn garbage_is_dropped_by_ranker() {
        let profile = RankingProfile::default();
        let cam = parse_title("The.Matrix.1999.CAM.x264");
        assert_eq!(rank(&cam, &profile), None);
        let xvid = parse_title("The.Matrix.1999.DVDRip.XviD");
        assert_eq!(rank(&xvid, &profile), None);
        let av1 = parse_title("The.Matrix.1999.1080p.AV1");
        assert_eq!(rank(&av1, &profile), None);
    }

    #[test]
    fn ranking_prefers_better_sources() {
        let profile = RankingProfile::default();
        let bluray = rank(&parse_title("Movie.2020.1080p.BluRay.x264"), &profile).unwrap();
        let webrip = rank(&parse_title("Movie.2020.1080p.WEBRip.x264"), &profile).unwrap();
        let hdtv = rank(&parse_title("Movie.2020.720p.HDTV.x264"), &profile).unwrap();
        assert!(bluray > webrip);
        assert!(webrip > hdtv);
    }

    #[test]
    fn four_k_gated_by_profile() {
        let mut profile = RankingProfile::default();
        profile.include_4k = false;
        let uhd = parse_title("Movie.2020.2160p.WEB-DL");
        assert_eq!(rank(&uhd, &profile), None);
        profile.include_4k = true;
        assert!(rank(&uhd, &profile).is_some());
    }

    #[test]
    fn title_matching() {
        assert!(title_match("The Matrix", "the.matrix"));
        assert!(title_match("Foo: Bar", "foo bar"));
        assert!(!title_match("The Matrix", "The Matrix Reloaded"));
    }

    #[test]
    fn filename_round_trip() {
        // filenames produced by the symlinker parse back to the same numbers
        let name = "Foo (2020) - s02e03 - Some Title.mkv";
        let (season, episode) = crate::utils::season_episode_from_name(name).unwrap();
        assert_eq!((season, episode), (2, 3));

        let ranged = "Foo (2020) - s01e01-e02 - Double.mkv";
        let parsed = parse_title(ranged);
        assert_eq!(parsed.seasons, vec![1]);
        assert_eq!(parsed.episodes, vec![1, 2]);
    }
}
