pub mod request_codec;
