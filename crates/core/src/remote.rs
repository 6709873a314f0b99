/// Transport commands from a remote-control surface (lock screen, headset
/// buttons, media keys).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoteCommand {
    Play,
    Pause,
    TogglePlayPause,
    Next,
    Previous,
    SeekTo(f64),
    SkipForward(f64),
    SkipBackward(f64),
    Stop,
}
