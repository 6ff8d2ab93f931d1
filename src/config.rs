//! User-tunable settings and the versioned JSON blob they persist as.
//!
//! The same blob format is used for the preferences file, clipboard
//! copy/paste and the built-in presets, so load and save must stay exact
//! round-trip inverses for every field. Missing keys fall back to the
//! built-in defaults per field; a blob that fails to parse at all falls
//! back to the full default record.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Blob schema version. Bump only on incompatible key changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Linear RGB triple in [0, 1] per channel.
pub type Color = [f32; 3];

/// The process-wide settings record. One instance is shared between the
/// host (which edits it) and the render pipeline (which snapshots it each
/// tick); see [`SharedSettings`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "v")]
    pub version: u32,
    #[serde(rename = "Color1")]
    pub color1: Color,
    #[serde(rename = "Color2")]
    pub color2: Color,
    #[serde(rename = "Color3")]
    pub color3: Color,
    #[serde(rename = "BackgroundColor")]
    pub background_color: Color,
    /// Cells-per-pixel divisor for the simulation grid. Stored as a float
    /// for interchange compatibility, floored and clamped to >= 1 at use.
    #[serde(rename = "RenderScale")]
    pub render_scale: f32,
    /// Per-cell random spawn chance per step. Expected range [0, 1).
    #[serde(rename = "SpawnProbability")]
    pub spawn_probability: f32,
    /// Frames to wait between simulation steps. The settings UI exposes
    /// this inverted (`50 - slider`) so a higher slider feels faster; the
    /// stored value is already in wait-frame units and the engine reads
    /// it directly.
    #[serde(rename = "SimSpeed")]
    pub sim_speed: f32,
    /// Trail sampling-noise scale used by the compositor. Not a buffer
    /// dimension.
    #[serde(rename = "TrailScale")]
    pub trail_scale: f32,
    /// Noise phase speed. The settings UI cubes the slider value before
    /// storing it.
    #[serde(rename = "NoiseSpeed")]
    pub noise_speed: f32,
    #[serde(rename = "ActivityMultiplier")]
    pub activity_multiplier: f32,
    #[serde(rename = "LifeStateMultiplier")]
    pub life_state_multiplier: f32,
    /// Expected range [0, 1]. Gates random spawns and drives trail spread
    /// as `1 - idle_threshold`.
    #[serde(rename = "IdleThreshold")]
    pub idle_threshold: f32,
    #[serde(rename = "BleachBackground")]
    pub bleach_background: bool,
    #[serde(rename = "InvertBackground")]
    pub invert_background: bool,
    /// Legacy flag kept so old blobs keep round-tripping.
    #[serde(rename = "IsInverted")]
    pub is_inverted: bool,
    /// Key into the logo catalog; unknown keys resolve to `"none"`.
    #[serde(rename = "Logo")]
    pub logo: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            color1: [1.0, 0.933, 0.0],
            color2: [1.0, 0.157, 0.2228],
            color3: [0.0, 0.663, 0.971],
            background_color: [0.828, 0.793, 0.737],
            render_scale: 21.0,
            spawn_probability: 0.000_448_747_97,
            sim_speed: 7.0,
            trail_scale: 1.57,
            noise_speed: 0.1,
            activity_multiplier: -0.0073,
            life_state_multiplier: 0.8266,
            idle_threshold: 0.299,
            bleach_background: false,
            invert_background: false,
            is_inverted: false,
            logo: "logo-max-white".to_string(),
        }
    }
}

impl Settings {
    /// Parse a blob, merging present keys over the defaults. A blob that
    /// is not valid JSON at all yields the full default record.
    pub fn from_json(blob: &str) -> Self {
        match serde_json::from_str(blob) {
            Ok(settings) => settings,
            Err(err) => {
                log::warn!("malformed settings blob ({err}), falling back to defaults");
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("settings always serialize")
    }

    /// Load from the preferences file, or defaults if it is absent or
    /// corrupt. Never fails: the animation must start regardless.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(blob) => Self::from_json(&blob),
            Err(err) => {
                log::info!("no preferences at {} ({err}), using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        fs::write(path, self.to_json())
    }

    /// Grid divisor, floored and clamped to a sane minimum.
    pub fn render_scale_cells(&self) -> u32 {
        (self.render_scale as u32).max(1)
    }

    /// Frames to wait between steps, read directly from the stored value.
    pub fn step_wait_frames(&self) -> i32 {
        self.sim_speed as i32
    }
}

/// Single-writer/any-reader handle to the current settings. The pipeline
/// only ever snapshots it, except for logo self-healing.
pub type SharedSettings = Arc<RwLock<Settings>>;

pub fn shared(settings: Settings) -> SharedSettings {
    Arc::new(RwLock::new(settings))
}

/// Consistent per-tick copy of the shared record.
pub fn snapshot(settings: &SharedSettings) -> Settings {
    settings.read().expect("settings lock poisoned").clone()
}

/// Built-in presets, each a complete blob in the interchange format.
/// Loaded through the same merge-with-defaults path as everything else.
pub const PRESETS: &[(&str, &str)] = &[
    ("neon", r#"{"v":1,"ActivityMultiplier":0.30069553852081299,"Color2":[0.13525280356407166,1,0.024886835366487503],"IdleThreshold":0.28201344609260559,"Logo":"logo-ds-white","SpawnProbability":0.00025327006005682051,"TrailScale":0.31898921728134155,"BackgroundColor":[0.01004718616604805,0.038772746920585632,0.031161896884441376],"SimSpeed":5.3623771667480469,"Color3":[0,0,0.9981992244720459],"IsInverted":false,"BleachBackground":true,"Color1":[0.9859541654586792,0,0.026940008625388145],"LifeStateMultiplier":-0.7426038384437561,"InvertBackground":true,"NoiseSpeed":0.42516869306564331,"RenderScale":17}"#),
    ("matrix", r#"{"TrailScale":1.9669622182846069,"v":1,"InvertBackground":true,"SimSpeed":3.8188362121582031,"IdleThreshold":0.114566370844841,"Color1":[0.69249600172042847,1,0.84084510803222656],"Color2":[0.37886357307434082,1,0.54875057935714722],"Logo":"logo-ds-white","BackgroundColor":[0.019857162609696388,0.019857164472341537,0.019857168197631836],"ActivityMultiplier":1,"RenderScale":8,"NoiseSpeed":0.19462895393371582,"BleachBackground":false,"SpawnProbability":0.00028388385544531047,"LifeStateMultiplier":-0.0079104620963335037,"Color3":[0.4814445972442627,0.63014680147171021,0.54987359046936035],"IsInverted":false}"#),
    ("gameoflife", r#"{"Color1":[0.99897301197052002,0.93125414848327637,0.039746273308992386],"ActivityMultiplier":-0.0072981975972652435,"LifeStateMultiplier":0.82658207416534424,"BleachBackground":false,"BackgroundColor":[0.78751087188720703,0.74848926067352295,0.68269526958465576],"SpawnProbability":0.0004487479745876044,"InvertBackground":false,"NoiseSpeed":0,"RenderScale":21,"TrailScale":1.5760922431945801,"Logo":"logo-ds-black","v":1,"IsInverted":false,"Color3":[0.072327166795730591,0.59053975343704224,0.96232986450195312],"Color2":[0.98623359203338623,0.019132889807224274,0.1724221408367157],"SimSpeed":6.5525741577148438,"IdleThreshold":0.29941979050636292}"#),
    ("oil", r#"{"Color3":[0.78327417373657227,0.70900106430053711,0.96309268474578857],"IsInverted":false,"NoiseSpeed":0.42516869306564331,"SpawnProbability":0.00032746334909461439,"SimSpeed":8.6353569030761719,"BackgroundColor":[0,0,0],"Color1":[0.99809360504150391,0.91447460651397705,0.80034911632537842],"LifeStateMultiplier":-0.010139106772840023,"InvertBackground":true,"RenderScale":21,"Color2":[0.99818575382232666,0.92595911026000977,0.96239590644836426],"BleachBackground":false,"TrailScale":10,"ActivityMultiplier":0,"Logo":"logo-ds-white","IdleThreshold":0.72352147102355957,"v":1}"#),
    ("ink", r#"{"v":1,"SimSpeed":4.2910232543945312,"Color1":[0.0092786252498626709,0.12652374804019928,0.15969750285148621],"ActivityMultiplier":0,"BleachBackground":false,"IsInverted":false,"NoiseSpeed":0.26983422040939331,"SpawnProbability":9.4704293587710708e-05,"RenderScale":21,"Color3":[0.81927406787872314,0.10842597484588623,0.14145712554454803],"InvertBackground":false,"TrailScale":1.849170446395874,"Logo":"logo-max-color","LifeStateMultiplier":0,"BackgroundColor":[0.98943054676055908,0.95796835422515869,0.8640669584274292],"Color2":[0.91610729694366455,0.89003515243530273,0.79781758785247803],"IdleThreshold":1}"#),
    ("muted", r#"{"ActivityMultiplier":0,"SpawnProbability":4.8618181608617306e-05,"InvertBackground":false,"v":1,"Color2":[0.13525280356407166,1,0.024886835366487503],"BackgroundColor":[0.20868071913719177,1,0.63409161567687988],"IsInverted":false,"SimSpeed":1,"NoiseSpeed":0.42516869306564331,"RenderScale":2,"TrailScale":2.8426556587219238,"LifeStateMultiplier":-0.010139106772840023,"Logo":"logo-ds-orange","Color3":[0,0,0.9981992244720459],"Color1":[0.9859541654586792,0,0.026940008625388145],"IdleThreshold":0.06923096626996994,"BleachBackground":true}"#),
    ("retro", r#"{"Color1":[0.7373620867729187,1,0.87136399745941162],"BackgroundColor":[0.011311651207506657,0.0099806208163499832,0.010512500070035458],"BleachBackground":true,"NoiseSpeed":0.19462895393371582,"IsInverted":false,"Logo":"logo-max-white","Color3":[0.55063050985336304,0.68662387132644653,0.61866706609725952],"SimSpeed":3.8188362121582031,"IdleThreshold":0.114566370844841,"Color2":[0.42561632394790649,1,0.61705249547958374],"LifeStateMultiplier":-0.0079104620963335037,"SpawnProbability":0.00028388385544531047,"TrailScale":1.9669622182846069,"ActivityMultiplier":1,"v":1,"InvertBackground":true,"RenderScale":8}"#),
    ("cherryblossom", r#"{"Color1":[0,1,0],"Color3":[0.72297602891921997,0.71629601716995239,0.72791683673858643],"Color2":[0.90180248022079468,0.7588571310043335,1],"NoiseSpeed":1,"ActivityMultiplier":1,"SpawnProbability":0.0006694694166071713,"IsInverted":false,"RenderScale":6,"SimSpeed":29.48809814453125,"IdleThreshold":0.11924944818019867,"BackgroundColor":[0,0.20783211290836334,0.60615009069442749],"InvertBackground":true,"TrailScale":3.9173617362976074,"BleachBackground":true,"Logo":"logo-ds-black","v":1,"LifeStateMultiplier":0.24904833734035492}"#),
    ("blots", r#"{"TrailScale":1.7793483734130859,"BackgroundColor":[0.85789632797241211,0.8434033989906311,0.92296361923217773],"BleachBackground":true,"v":1,"ActivityMultiplier":0.017085693776607513,"SimSpeed":1,"LifeStateMultiplier":-0.1537269800901413,"Logo":"logo-max-white","InvertBackground":false,"Color3":[0.45093908905982971,0.45093908905982971,0.45093908905982971],"IdleThreshold":0.70547330379486084,"IsInverted":false,"Color2":[0.65203070640563965,0.65203070640563965,0.65203070640563965],"NoiseSpeed":1,"RenderScale":6,"Color1":[0.99999505281448364,1,1],"SpawnProbability":0.00048544033779762685}"#),
    ("microscopic", r#"{"InvertBackground":true,"LifeStateMultiplier":0.24904833734035492,"BackgroundColor":[0,0,0],"Color1":[0,1,0],"TrailScale":1.0058879852294922,"SimSpeed":29.48809814453125,"BleachBackground":false,"Color2":[0.90180248022079468,0.7588571310043335,1],"Color3":[0.72297602891921997,0.71629601716995239,0.72791683673858643],"RenderScale":6,"SpawnProbability":0.0006694694166071713,"ActivityMultiplier":1,"IdleThreshold":0.11924944818019867,"NoiseSpeed":1,"v":1,"IsInverted":false,"Logo":"logo-max-color"}"#),
    ("radar", r#"{"Color2":[0.48859408497810364,0.17009060084819794,1],"SimSpeed":5.37091064453125,"ActivityMultiplier":0.91246902942657471,"BackgroundColor":[0.019857162609696388,0.019857164472341537,0.019857168197631836],"InvertBackground":false,"Color1":[0.11973889172077179,0.93520808219909668,1],"IsInverted":false,"Color3":[0.64864599704742432,0.45325437188148499,0.014000219292938709],"v":1,"SpawnProbability":0.00078987580491229892,"Logo":"logo-ds-white","BleachBackground":false,"RenderScale":23,"TrailScale":7.3011364936828613,"NoiseSpeed":0.041120424866676331,"LifeStateMultiplier":-0.33945643901824951,"IdleThreshold":0.56359970569610596}"#),
    ("grass", r#"{"IdleThreshold":0.24233642220497131,"Logo":"logo-ds-white","SimSpeed":1,"TrailScale":0,"Color1":[0,1.1785851711465511e-05,0.50196588039398193],"Color3":[0,0,0],"RenderScale":4,"ActivityMultiplier":0,"BleachBackground":false,"Color2":[0.79999417066574097,1,0.40000131726264954],"SpawnProbability":0.0010000000474974513,"IsInverted":false,"LifeStateMultiplier":0.082772664725780487,"BackgroundColor":[0.16541001200675964,0.037813693284988403,0.16754055023193359],"v":1,"InvertBackground":true,"NoiseSpeed":0.00069782213540747762}"#),
    ("lichen", r#"{"BackgroundColor":[0.13130249083042145,0.99969744682312012,0.023593783378601074],"SimSpeed":7.0104928016662598,"SpawnProbability":0.000675792689435184,"TrailScale":7.0140671730041504,"RenderScale":8,"Color1":[0.99999505281448364,1,1],"NoiseSpeed":0.39779803156852722,"ActivityMultiplier":0,"LifeStateMultiplier":-0.16753718256950378,"IsInverted":false,"IdleThreshold":0.42160007357597351,"v":1,"InvertBackground":true,"Color2":[0,0,0],"BleachBackground":false,"Logo":"logo-max-white","Color3":[0.99999690055847168,1,0.4000009298324585]}"#),
    ("rgb", r#"{"BackgroundColor":[0.99999505281448364,1,1],"SimSpeed":4.3336119651794434,"IdleThreshold":0.78508752584457397,"Color2":[0.13130249083042145,0.99969744682312012,0.023593783378601074],"IsInverted":false,"LifeStateMultiplier":0.082772664725780487,"BleachBackground":false,"NoiseSpeed":0.58014476299285889,"Color3":[6.5747648477554321e-05,0.0018010139465332031,0.99822854995727539],"v":1,"InvertBackground":false,"RenderScale":13,"SpawnProbability":0.00026733183767646551,"Color1":[0.98625171184539795,0.0072359740734100342,0.027423009276390076],"TrailScale":3.8168988227844238,"ActivityMultiplier":0,"Logo":"logo-ds-black"}"#),
];

/// Look up a preset by name.
pub fn preset(name: &str) -> Option<Settings> {
    PRESETS
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, blob)| Settings::from_json(blob))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"{"v":1,"RenderScale":21,"SpawnProbability":0.00044874797,"SimSpeed":7,"TrailScale":1.57,"NoiseSpeed":0.1,"ActivityMultiplier":-0.0073,"LifeStateMultiplier":0.8266,"IdleThreshold":0.299,"BleachBackground":false,"InvertBackground":false,"Logo":"logo-max-white"}"#;

    #[test]
    fn example_blob_round_trips() {
        let settings = Settings::from_json(EXAMPLE);
        assert_eq!(settings.version, SCHEMA_VERSION);
        assert_eq!(settings.render_scale, 21.0);
        assert_eq!(settings.spawn_probability, 0.000_448_747_97);
        assert_eq!(settings.sim_speed, 7.0);
        assert_eq!(settings.trail_scale, 1.57);
        assert_eq!(settings.noise_speed, 0.1);
        assert_eq!(settings.activity_multiplier, -0.0073);
        assert_eq!(settings.life_state_multiplier, 0.8266);
        assert_eq!(settings.idle_threshold, 0.299);
        assert!(!settings.bleach_background);
        assert!(!settings.invert_background);
        assert_eq!(settings.logo, "logo-max-white");

        let reparsed = Settings::from_json(&settings.to_json());
        assert_eq!(settings, reparsed);
    }

    #[test]
    fn empty_record_is_defaults() {
        assert_eq!(Settings::from_json("{}"), Settings::default());
    }

    #[test]
    fn malformed_blob_is_defaults() {
        assert_eq!(Settings::from_json("not json at all {{"), Settings::default());
        assert_eq!(Settings::from_json(""), Settings::default());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let settings = Settings::from_json(r#"{"SimSpeed":3,"SomeFutureKey":true}"#);
        assert_eq!(settings.sim_speed, 3.0);
    }

    #[test]
    fn colors_parse_as_triples() {
        let settings = Settings::from_json(r#"{"Color1":[0.25,0.5,0.75]}"#);
        assert_eq!(settings.color1, [0.25, 0.5, 0.75]);
        assert_eq!(settings.color2, Settings::default().color2);
    }

    #[test]
    fn every_preset_parses() {
        for (name, blob) in PRESETS {
            // A preset that silently collapses to the default record is a
            // broken blob; SimSpeed differs from default in all of them
            // except those that happen to share it, so check a stronger
            // condition: parsing must have consumed the stored colors.
            let settings = Settings::from_json(blob);
            let raw: serde_json::Value = serde_json::from_str(blob).expect(name);
            assert_eq!(settings.version, SCHEMA_VERSION, "preset {name}");
            assert_eq!(
                f64::from(settings.render_scale),
                raw["RenderScale"].as_f64().expect(name),
                "preset {name}"
            );
            assert!(preset(name).is_some());
        }
    }

    #[test]
    fn preset_lookup_misses_unknown_names() {
        assert!(preset("does-not-exist").is_none());
    }

    #[test]
    fn scale_and_speed_conversions() {
        let mut settings = Settings::default();
        settings.render_scale = 0.4;
        assert_eq!(settings.render_scale_cells(), 1);
        settings.render_scale = 21.9;
        assert_eq!(settings.render_scale_cells(), 21);
        settings.sim_speed = 7.9;
        assert_eq!(settings.step_wait_frames(), 7);
    }
}
