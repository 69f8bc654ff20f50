//! 用户界面层。目前只有问答式 CLI 一种形态。

pub mod noui;
