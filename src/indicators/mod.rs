pub mod volume_profile;
pub mod support_resistance;
pub mod smart_money_structure;
pub mod order_blocks;
