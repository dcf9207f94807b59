use std::fmt;

/// Device-level operation routed through the zone registry. The wire name is
/// the camelCase string produced by [`Verb::as_str`]; configuration may use
/// the kebab-case aliases accepted by [`Verb::from_str_opt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    // Media playback
    PlayVideo,
    PlayBackground,
    PlayAudioFx,
    PlaySpeech,
    StopAll,
    StopBackground,
    StopSpeech,
    StopAudio,
    StopVideo,
    SetImage,
    SetVolume,
    // Media browser control
    EnableBrowser,
    DisableBrowser,
    ShowBrowser,
    HideBrowser,
    SleepBrowser,
    WakeBrowser,
    SetBrowserUrl,
    // Media color output
    SetColor,
    SetColorScene,
    // Media host control
    Shutdown,
    Reboot,
    Poweroff,
    Kill,
    Restart,
    RequestState,
    // Media verification
    VerifyBrowser,
    VerifyImage,
    // Clock
    Start,
    Pause,
    Resume,
    FadeIn,
    FadeOut,
    SetTime,
    Hint,
}

impl Verb {
    /// Wire-format verb name published in zone command payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlayVideo => "playVideo",
            Self::PlayBackground => "playBackground",
            Self::PlayAudioFx => "playAudioFX",
            Self::PlaySpeech => "playSpeech",
            Self::StopAll => "stopAll",
            Self::StopBackground => "stopBackground",
            Self::StopSpeech => "stopSpeech",
            Self::StopAudio => "stopAudio",
            Self::StopVideo => "stopVideo",
            Self::SetImage => "setImage",
            Self::SetVolume => "setVolume",
            Self::EnableBrowser => "enableBrowser",
            Self::DisableBrowser => "disableBrowser",
            Self::ShowBrowser => "showBrowser",
            Self::HideBrowser => "hideBrowser",
            Self::SleepBrowser => "sleepBrowser",
            Self::WakeBrowser => "wakeBrowser",
            Self::SetBrowserUrl => "setBrowserUrl",
            Self::SetColor => "setColor",
            Self::SetColorScene => "setColorScene",
            Self::Shutdown => "shutdown",
            Self::Reboot => "reboot",
            Self::Poweroff => "poweroff",
            Self::Kill => "kill",
            Self::Restart => "restart",
            Self::RequestState => "requestState",
            Self::VerifyBrowser => "verifyBrowser",
            Self::VerifyImage => "verifyImage",
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::FadeIn => "fadeIn",
            Self::FadeOut => "fadeOut",
            Self::SetTime => "setTime",
            Self::Hint => "hint",
        }
    }

    /// Parse a verb from its wire name or a configuration alias. Returns
    /// `None` for unknown verbs; callers warn rather than fail.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "playVideo" => Some(Self::PlayVideo),
            "playBackground" => Some(Self::PlayBackground),
            "playAudioFX" | "playAudioFx" => Some(Self::PlayAudioFx),
            "playSpeech" => Some(Self::PlaySpeech),
            "stopAll" => Some(Self::StopAll),
            "stopBackground" => Some(Self::StopBackground),
            "stopSpeech" => Some(Self::StopSpeech),
            "stopAudio" => Some(Self::StopAudio),
            "stopVideo" => Some(Self::StopVideo),
            "setImage" => Some(Self::SetImage),
            "setVolume" => Some(Self::SetVolume),
            "enableBrowser" => Some(Self::EnableBrowser),
            "disableBrowser" => Some(Self::DisableBrowser),
            "showBrowser" => Some(Self::ShowBrowser),
            "hideBrowser" => Some(Self::HideBrowser),
            "sleepBrowser" => Some(Self::SleepBrowser),
            "wakeBrowser" => Some(Self::WakeBrowser),
            "setBrowserUrl" => Some(Self::SetBrowserUrl),
            "setColor" => Some(Self::SetColor),
            "setColorScene" | "scene" => Some(Self::SetColorScene),
            "shutdown" => Some(Self::Shutdown),
            "reboot" => Some(Self::Reboot),
            "poweroff" => Some(Self::Poweroff),
            "kill" => Some(Self::Kill),
            "restart" => Some(Self::Restart),
            "requestState" => Some(Self::RequestState),
            "verifyBrowser" => Some(Self::VerifyBrowser),
            "verifyImage" => Some(Self::VerifyImage),
            "start" => Some(Self::Start),
            "pause" => Some(Self::Pause),
            "resume" => Some(Self::Resume),
            "fadeIn" | "fade-in" => Some(Self::FadeIn),
            "fadeOut" | "fade-out" => Some(Self::FadeOut),
            "setTime" | "set-time" => Some(Self::SetTime),
            "hint" => Some(Self::Hint),
            _ => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
