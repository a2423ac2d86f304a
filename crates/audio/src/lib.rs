pub mod device;
pub mod pcm;
