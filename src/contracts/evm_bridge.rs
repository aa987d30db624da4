//! EVM bridge contract ABI definition
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the bridge contract.

use alloy::sol;

sol! {
    /// Bridge contract on the EVM side: burns outbound, mints inbound
    #[sol(rpc)]
    contract EvmBridge {
        /// Emitted when a user burns wrapped tokens to release them on L1.
        /// No indexed fields; every value lives in the data section.
        event BurnEvent(
            address sender,
            bytes recipientL1,
            uint8 tokenType,
            uint256 amount,
            uint64 nonce,
            bytes32 evmTxHash
        );

        /// Mint wrapped tokens for an observed L1 lock
        ///
        /// # Arguments
        /// * `recipient` - EVM address receiving the tokens
        /// * `tokenType` - Bridge token discriminator
        /// * `amount` - Amount in base units
        /// * `l1Nonce` - Nonce of the L1 lock event
        /// * `l1TxDigest` - Digest bytes carried by the L1 lock event
        function mint(
            address recipient,
            uint8 tokenType,
            uint256 amount,
            uint64 l1Nonce,
            bytes l1TxDigest
        ) external;

        /// Whether an L1 nonce has already been minted
        function processedNonces(uint64 nonce) external view returns (bool);
    }
}
